use clap::{Args, Parser, ValueEnum};
use giputils::hash::GHashSet;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// rKind model checker
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(version, about)]
pub struct Config {
    /// model file in the toml system format, `-` reads stdin
    #[arg(default_value = "-")]
    pub model: PathBuf,

    /// engines to run concurrently
    #[arg(short, long, value_enum, value_delimiter = ',', default_values_t = [Engine::Bmc, Engine::Kind, Engine::InvgenBool, Engine::InvgenInt])]
    pub engines: Vec<Engine>,

    /// top system, defaults to the last system of the model
    #[arg(long)]
    pub top: Option<String>,

    /// max depth to unroll
    #[arg(long = "end", default_value_t = 50)]
    pub end: usize,

    /// wall clock limit in seconds
    #[arg(long = "time-limit")]
    pub time_limit: Option<u64>,

    #[command(flatten)]
    pub smt: SmtConfig,

    #[command(flatten)]
    pub bmc: BmcConfig,

    #[command(flatten)]
    pub kind: KindConfig,

    #[command(flatten)]
    pub invgen: InvGenConfig,
}

#[derive(Copy, Clone, ValueEnum, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Engine {
    /// bounded model checking, base case of k-induction
    Bmc,
    /// k-induction step case
    Kind,
    /// boolean invariant generation
    InvgenBool,
    /// integer invariant generation
    InvgenInt,
}

#[derive(Copy, Clone, ValueEnum, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Solver {
    Z3,
    Cvc5,
}

#[derive(Args, Clone, Debug, Serialize, Deserialize)]
pub struct SmtConfig {
    /// smt solver
    #[arg(long = "smt-solver", value_enum, default_value_t = Solver::Z3)]
    pub solver: Solver,

    /// solver executable, defaults to the solver name looked up in PATH
    #[arg(long = "smt-bin")]
    pub bin: Option<PathBuf>,

    /// per query timeout in milliseconds
    #[arg(long = "smt-timeout")]
    pub timeout: Option<u64>,

    /// dump every solver conversation into this directory
    #[arg(long = "smt-trace")]
    pub trace: Option<PathBuf>,
}

#[derive(Args, Clone, Debug, Serialize, Deserialize)]
pub struct BmcConfig {
    /// do not assert invariants found by other engines
    #[arg(long = "bmc-no-invariants", default_value_t = false)]
    pub no_invariants: bool,
}

#[derive(Copy, Clone, ValueEnum, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmPolicy {
    /// unfalsifiable at k needs the base case up to k - 1
    Sound,
    /// unfalsifiable at k needs the base case up to k
    Strict,
}

#[derive(Args, Clone, Debug, Serialize, Deserialize)]
pub struct KindConfig {
    /// simple path constraint
    #[arg(long = "kind-simple-path", default_value_t = false)]
    pub simple_path: bool,

    /// no path compression
    #[arg(long = "kind-no-compress", default_value_t = false)]
    pub no_compress: bool,

    /// assert invariants only when a counterexample violates them
    #[arg(long = "kind-lazy-invariants", default_value_t = false)]
    pub lazy_invariants: bool,

    /// base case required before an unfalsifiable property is promoted
    #[arg(long = "kind-confirm", value_enum, default_value_t = ConfirmPolicy::Sound)]
    pub confirm: ConfirmPolicy,
}

#[derive(Args, Clone, Debug, Serialize, Deserialize)]
pub struct InvGenConfig {
    /// extract every equality and comparison implied by the graph, not only
    /// the ones between representatives
    #[arg(long = "invgen-all-out", default_value_t = false)]
    pub all_out: bool,

    /// stop after this many consecutive depths refining no graph and
    /// finding no invariant
    #[arg(long = "invgen-patience", default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub patience: u32,

    /// only the top system, no subsystem invariants
    #[arg(long = "invgen-top-only", default_value_t = false)]
    pub top_only: bool,

    /// no smt check in candidate pruning
    #[arg(long = "invgen-no-smt-prune", default_value_t = false)]
    pub no_smt_prune: bool,
}

impl Config {
    /// Selected engines, each once, in order of first mention.
    pub fn engine_set(&self) -> Vec<Engine> {
        let mut seen = GHashSet::new();
        self.engines.iter().copied().filter(|e| seen.insert(*e)).collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["rkind"])
    }
}

impl Default for SmtConfig {
    fn default() -> Self {
        Config::default().smt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags() {
        let cfg = Config::parse_from([
            "rkind",
            "m.toml",
            "-e",
            "bmc,kind",
            "--end",
            "7",
            "--kind-confirm",
            "strict",
            "--invgen-patience",
            "3",
        ]);
        assert_eq!(cfg.engines, [Engine::Bmc, Engine::Kind]);
        assert_eq!(cfg.end, 7);
        assert_eq!(cfg.kind.confirm, ConfirmPolicy::Strict);
        assert_eq!(cfg.invgen.patience, 3);
        let d = Config::default();
        assert_eq!(d.model, PathBuf::from("-"));
        assert_eq!(d.engines.len(), 4);
        assert_eq!(d.smt.solver, Solver::Z3);
    }

    #[test]
    fn repeated_engines_run_once() {
        let cfg = Config::parse_from(["rkind", "-e", "bmc,kind,bmc,invgen-int,kind"]);
        assert_eq!(
            cfg.engine_set(),
            [Engine::Bmc, Engine::Kind, Engine::InvgenInt]
        );
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = Config::parse_from(["rkind", "m.toml", "--kind-lazy-invariants", "--end", "12"]);
        let text = toml::to_string(&cfg).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.model, cfg.model);
        assert_eq!(back.engines, cfg.engines);
        assert_eq!(back.end, 12);
        assert!(back.kind.lazy_invariants);
        assert_eq!(back.kind.confirm, ConfirmPolicy::Sound);
    }
}
