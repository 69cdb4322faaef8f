//! 数据模型模块

pub mod account;
pub mod deck;
pub mod plan;

// 重新导出常用类型
pub use account::*;
pub use deck::*;
pub use plan::*;
