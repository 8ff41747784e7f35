//! Both ends of a proximity presentation.
pub mod device;
pub mod reader;
