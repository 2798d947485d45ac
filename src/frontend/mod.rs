mod model;

pub use model::{ModelFile, TomlFrontend};

use crate::{
    sexp::SexpError,
    term::TermError,
    transys::{TransSys, property::Cex},
};
use std::{io, sync::Arc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrontendError {
    #[error("reading model: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error("in {system}: {source}")]
    Sexp {
        system: String,
        source: SexpError,
    },
    #[error("in {system}: {source}")]
    Term {
        system: String,
        source: TermError,
    },
    #[error("in {system}: {msg}")]
    Invalid { system: String, msg: String },
    #[error("model defines no system")]
    Empty,
    #[error("unknown system `{0}`")]
    UnknownSystem(String),
}

pub trait Frontend {
    fn ts(&self) -> Arc<TransSys>;

    /// Renders a counterexample of property `prop` in the model's terms.
    fn witness(&self, prop: &str, cex: &Cex) -> String;
}
