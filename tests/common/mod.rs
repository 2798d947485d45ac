#![allow(dead_code)]

use rKind::{
    config::{Config, Engine},
    frontend::ModelFile,
    smt::solver_available,
    transys::TransSys,
};
use std::sync::Arc;

/// Default configuration running `engines`, or `None` when no solver is
/// installed.
pub fn config(engines: &[Engine], end: usize) -> Option<Config> {
    let mut cfg = Config::default();
    if !solver_available(&cfg.smt) {
        eprintln!("z3 not found, skipping");
        return None;
    }
    cfg.engines = engines.to_vec();
    cfg.end = end;
    Some(cfg)
}

pub fn system(src: &str) -> Arc<TransSys> {
    ModelFile::parse(src).unwrap().build(None).unwrap()
}

/// Counts to 3 and wraps around.
pub const WRAPPING: &str = r#"
    [[system]]
    name = "wrapping"
    vars = { x = "int" }
    init = "(= x 0)"
    trans = "(= (next x) (ite (>= x 3) 0 (+ x 1)))"
    props = { bounded = "(<= x 3)" }
"#;

/// Counts forever.
pub const UNBOUNDED: &str = r#"
    [[system]]
    name = "unbounded"
    vars = { x = "int" }
    init = "(= x 0)"
    trans = "(= (next x) (+ x 1))"
    props = { small = "(< x 5)" }
"#;

/// Two counters in lockstep.
pub const TWINS: &str = r#"
    [[system]]
    name = "twins"
    vars = { x = "int", y = "int" }
    init = "(and (= x 0) (= y 0))"
    trans = "(and (= (next x) (+ x 1)) (= (next y) (+ y 1)))"
    props = { same = "(= x y)" }
"#;

/// `x` stays put except at 1, which it leaves for 2 once `i` is off. Only 0
/// is reachable.
pub const LATCH: &str = r#"
    [[system]]
    name = "latch"
    vars = { x = "int", i = "bool" }
    init = "(= x 0)"
    trans = "(= (next x) (ite (= x 1) (ite i 1 2) x))"
    props = { safe = "(not (= x 2))" }
"#;

/// A counter two levels below the top system.
pub const NESTED: &str = r#"
    [[system]]
    name = "leaf"
    vars = { x = "int" }
    init = "(= x 0)"
    trans = "(= (next x) (ite (>= x 3) 0 (+ x 1)))"

    [[system]]
    name = "mid"
    vars = { m = "int" }

    [[system.instance]]
    name = "l"
    system = "leaf"
    map = { x = "m" }

    [[system]]
    name = "top"
    vars = { t = "int" }
    props = { bounded = "(<= t 3)" }

    [[system.instance]]
    name = "md"
    system = "mid"
    map = { m = "t" }
"#;
