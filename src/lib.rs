#![doc = include_str!("../README.md")]

pub mod assignment;
pub mod buffer;
pub mod comm;
pub mod config;
pub mod dataset;
mod error;
pub mod kdtree;
mod locator;
pub mod select;
pub mod tables;

pub use assignment::{RegionAssignment, RegionAssignmentMap};
pub use config::{BuildParameters, ValidDirections};
pub use dataset::{DataSet, FieldArray, PointCloud};
pub use error::{PKdTreeError, Result};
pub use locator::PKdTree;
