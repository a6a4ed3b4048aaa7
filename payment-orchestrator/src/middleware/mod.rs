pub mod caller;
pub mod operator;

pub use caller::CallerContext;
pub use operator::OperatorContext;
