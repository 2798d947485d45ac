#![allow(non_snake_case)]

pub mod bmc;
pub mod bus;
pub mod config;
pub mod frontend;
pub mod invgen;
pub mod kind;
pub mod portfolio;
pub mod prune;
pub mod sexp;
pub mod smt;
pub mod store;
pub mod term;
pub mod tracer;
pub mod transys;

use crate::{
    invgen::graph::GraphError, smt::SmtError, term::EvalError, transys::property::StatusError,
};
use log::debug;
use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Smt(#[from] SmtError),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl EngineError {
    #[inline]
    pub fn is_terminated(&self) -> bool {
        matches!(self, EngineError::Smt(SmtError::Terminated))
    }
}

/// Termination handle shared between an engine and whoever runs it.
/// Terminating also signals the engine's solver processes so that a
/// long-running query returns.
#[derive(Clone, Default)]
pub struct EngineCtrl {
    terminate: Arc<AtomicBool>,
    solvers: Arc<Mutex<Vec<i32>>>,
}

impl EngineCtrl {
    pub fn terminate(&self) {
        self.terminate.store(true, Ordering::Relaxed);
        let solvers = self.solvers.lock().unwrap_or_else(PoisonError::into_inner);
        for pid in solvers.iter() {
            debug!("interrupting solver process {pid}");
            let _ = kill(Pid::from_raw(*pid), Signal::SIGTERM);
        }
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::Relaxed)
    }

    pub(crate) fn register_solver(&self, pid: i32) {
        self.solvers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pid);
    }

    pub(crate) fn unregister_solver(&self, pid: i32) {
        self.solvers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|p| *p != pid);
    }
}

pub trait Engine: Send {
    fn name(&self) -> &'static str;

    /// Runs until every property it can decide is decided, the depth bound is
    /// reached, or termination is requested.
    fn check(&mut self) -> Result<(), EngineError>;

    /// Releases solver processes. Called once after `check` on every path.
    fn on_exit(&mut self) {
        self.statistic();
    }

    fn statistic(&mut self) {}

    fn get_ctrl(&self) -> EngineCtrl;
}
