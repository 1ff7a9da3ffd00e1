pub mod compare;
pub mod upload;
