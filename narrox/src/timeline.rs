//! Running timeline for subtitle (SRT) and lyric (LRC) rendering.

/// One rendered subtitle/lyric line: segment index, cumulative start/end
/// offsets in seconds, and the verbatim display text.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Accumulates per-segment durations into a monotonically growing timeline.
/// Entries are only ever appended in segment order; the cursor never rewinds.
#[derive(Debug, Default)]
pub struct TimelineAccumulator {
    cursor: f64,
    entries: Vec<TimelineEntry>,
}

impl TimelineAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the next segment. `duration_secs` comes straight from the
    /// waveform (`samples / sample_rate`).
    pub fn record(&mut self, index: usize, text: &str, duration_secs: f64) -> &TimelineEntry {
        let start = self.cursor;
        let end = start + duration_secs;
        self.cursor = end;
        self.entries.push(TimelineEntry {
            index,
            start,
            end,
            text: text.to_string(),
        });
        self.entries.last().unwrap()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Render the whole timeline as SubRip blocks.
    pub fn render_srt(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&format!(
                "{}\n{} --> {}\n{}\n\n",
                entry.index,
                format_srt_time(entry.start),
                format_srt_time(entry.end),
                entry.text
            ));
        }
        out
    }

    /// Render the whole timeline as LRC lines (start-of-line timestamps).
    pub fn render_lrc(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&format!("[{}]{}\n", format_lrc_time(entry.start), entry.text));
        }
        out
    }
}

/// `HH:MM:SS,mmm`, hours unbounded. The total is rounded half-up to whole
/// milliseconds before being decomposed, so rounding can never push a
/// seconds or minutes field to its modulus.
pub fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0 + 0.5).floor() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let s = total_secs % 60;
    let m = (total_secs / 60) % 60;
    let h = total_secs / 3600;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

/// `MM:SS.cc`, minutes unbounded, centisecond precision, rounded half-up on
/// the centisecond total.
pub fn format_lrc_time(seconds: f64) -> String {
    let total_cs = (seconds * 100.0 + 0.5).floor() as u64;
    let cs = total_cs % 100;
    let total_secs = total_cs / 100;
    let s = total_secs % 60;
    let m = total_secs / 60;
    format!("{:02}:{:02}.{:02}", m, s, cs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srt_time_rounds_half_up_to_milliseconds() {
        assert_eq!(format_srt_time(3661.4995), "01:01:01,500");
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(1.2), "00:00:01,200");
    }

    #[test]
    fn srt_time_carries_instead_of_printing_sixty() {
        assert_eq!(format_srt_time(59.9996), "00:01:00,000");
        assert_eq!(format_srt_time(3599.9999), "01:00:00,000");
    }

    #[test]
    fn lrc_time_uses_centiseconds() {
        assert_eq!(format_lrc_time(65.004), "01:05.00");
        assert_eq!(format_lrc_time(0.0), "00:00.00");
        assert_eq!(format_lrc_time(59.996), "01:00.00");
    }

    #[test]
    fn entries_are_contiguous_and_monotonic() {
        let mut timeline = TimelineAccumulator::new();
        timeline.record(1, "one", 1.25);
        timeline.record(2, "two", 0.5);
        timeline.record(3, "three", 2.0);

        let entries = timeline.entries();
        assert_eq!(entries[0].start, 0.0);
        for pair in entries.windows(2) {
            assert!(pair[0].start <= pair[0].end);
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert!(entries[2].end >= entries[2].start);
    }

    #[test]
    fn srt_render_matches_block_format() {
        let mut timeline = TimelineAccumulator::new();
        timeline.record(1, "first line", 1.2);
        timeline.record(2, "second line", 0.8);
        let srt = timeline.render_srt();
        assert_eq!(
            srt,
            "1\n00:00:00,000 --> 00:00:01,200\nfirst line\n\n\
             2\n00:00:01,200 --> 00:00:02,000\nsecond line\n\n"
        );
    }

    #[test]
    fn lrc_render_matches_line_format() {
        let mut timeline = TimelineAccumulator::new();
        timeline.record(1, "first line", 61.0);
        timeline.record(2, "second line", 1.0);
        assert_eq!(
            timeline.render_lrc(),
            "[00:00.00]first line\n[01:01.00]second line\n"
        );
    }
}
