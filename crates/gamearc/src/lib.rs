//! Command line front end for `gamearc_formats`.

pub mod commands;
