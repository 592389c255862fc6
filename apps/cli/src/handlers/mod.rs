pub mod demo;
pub mod listen;
pub mod publish;
