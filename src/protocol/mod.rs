pub mod command;
pub mod interpreter;
pub mod line_assembler;
pub use command::{parse_line, CacheOp, ProtocolLine, COMMAND_PREFIX};
pub use interpreter::Interpreter;
pub use line_assembler::{read_lines, LineAssembler};
