pub mod arch;
pub mod assembler;
pub mod bundle;
pub mod config;
pub mod crypt;
pub mod descriptor;
pub mod error;
pub mod ownership;
pub mod partition;
pub mod syscall;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod utils;

#[cfg(test)]
#[macro_use]
extern crate quickcheck;

pub use assembler::SifAssembler;
pub use bundle::{BuildBundle, BuildOptions};
pub use config::AssemblerConfig;
pub use crypt::KeySpec;
pub use error::AssembleError;
