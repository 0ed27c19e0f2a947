//! Launch description schema and substitution

pub mod launch_file;
pub mod substitution;

pub use launch_file::{
    ArgDecl, ArgValue, ExitPolicy, IncludeDecl, LaunchFile, LaunchFileError, LaunchItem, NodeDecl,
    OutputMode, RosparamCommand, RosparamDecl,
};
pub use substitution::{Resolver, SubstitutionError};
