pub mod bus;
pub mod document;
pub mod engine;
pub mod error;
pub mod sink;
pub mod supervisor;
pub mod synth;
pub mod text;
pub mod timeline;
pub mod worker;

pub use engine::{ConversionEngine, EngineState, Job};
pub use error::{ConvertError, Result};
