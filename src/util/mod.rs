mod io;
mod logging;

pub use io::{read_serialized, to_canonical_json, write_serialized};
pub use logging::{Logger, Severity, LOG};
