pub mod app;
pub mod config;
pub mod dicom;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod layout;
pub mod local;
pub mod manifest;
pub mod metadata;
pub mod nifti;
pub mod output;
pub mod placement;
pub mod series;
pub mod tcia;
pub mod volume;
