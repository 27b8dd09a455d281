//! ATP 数据源
//!
//! 为数据驱动的测试用例提供数据行，每一行驱动一次用例执行。

pub mod error;
pub mod reader;

pub use error::{DataSourceError, Result};
pub use reader::{
    DataSourceDescriptor, DataSourceKind, DataSourceReader, FileDataSourceReader,
    InMemoryDataSourceReader,
};
