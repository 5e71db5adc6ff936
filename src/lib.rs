#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use atx_os as os;
pub use atx_task as task;
pub use atx_utils as utils;
