mod atomic;
mod endian;
mod mapped;
mod process;

pub use atomic::write_atomically;
pub use endian::{put_f32_le, put_i32_le, ByteOrder};
pub use mapped::{MapCache, MappedFile};
pub use process::run_program;
