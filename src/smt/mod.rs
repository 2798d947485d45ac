//! Incremental SMT-LIB 2 conversation with an external solver process.

pub mod unroll;

use crate::{
    EngineCtrl,
    config::{SmtConfig, Solver},
    sexp::{Sexp, SexpError, read_sexp},
    term::{EvalError, Model, SVar, Term, Type, Value, quote, svar_symbol},
    transys::FunDef,
};
use giputils::{
    hash::GHashSet,
    statistic::{AverageDuration, SuccessRate},
};
use log::{debug, trace};
use process_control::{ChildExt, Control};
use std::{
    fmt::Write as _,
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    ops::RangeInclusive,
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmtError {
    #[error("failed to start solver `{bin}`: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: io::Error,
    },
    #[error("solver i/o: {0}")]
    Io(#[from] io::Error),
    #[error("solver error: {0}")]
    Solver(String),
    #[error("unexpected solver response `{0}`")]
    Unexpected(String),
    #[error("malformed solver output: {0}")]
    Parse(#[from] SexpError),
    #[error("solver gave up (unknown)")]
    Unknown,
    #[error("no model available")]
    NoModel,
    #[error("terminated")]
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
}

impl SatResult {
    #[inline]
    pub fn is_sat(&self) -> bool {
        matches!(self, SatResult::Sat)
    }
}

/// Activation literal. Guards constraints with `act => c`; retiring it
/// asserts `(not act)`, after which it can never be used again.
#[derive(Debug)]
pub struct Actlit(Term);

impl Actlit {
    #[inline]
    pub fn term(&self) -> &Term {
        &self.0
    }
}

#[derive(Debug, Default)]
pub struct SessionStatistic {
    pub num_check: usize,
    pub sat: SuccessRate,
    pub avg_check_time: AverageDuration,
    pub num_actlit: usize,
    pub num_assert: usize,
}

static SESSION_ID: AtomicUsize = AtomicUsize::new(0);

pub struct Session {
    name: String,
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    ctrl: EngineCtrl,
    trace: Option<BufWriter<File>>,
    declared: GHashSet<(SVar, i32)>,
    defined: GHashSet<String>,
    num_actlits: usize,
    has_model: bool,
    pub statistic: SessionStatistic,
}

impl Session {
    pub fn new(cfg: &SmtConfig, name: &str, ctrl: EngineCtrl) -> Result<Self, SmtError> {
        if ctrl.is_terminated() {
            return Err(SmtError::Terminated);
        }
        let name = format!("{name}{}", SESSION_ID.fetch_add(1, Ordering::Relaxed));
        let (default_bin, mut args) = match cfg.solver {
            Solver::Z3 => ("z3", vec!["-in".to_string(), "-smt2".to_string()]),
            Solver::Cvc5 => (
                "cvc5",
                vec![
                    "--incremental".to_string(),
                    "--lang=smt2".to_string(),
                    "--produce-models".to_string(),
                ],
            ),
        };
        if let (Solver::Cvc5, Some(t)) = (cfg.solver, cfg.timeout) {
            args.push(format!("--tlimit-per={t}"));
        }
        let bin = cfg
            .bin
            .as_ref()
            .map(|b| b.display().to_string())
            .unwrap_or_else(|| default_bin.to_string());
        let mut child = Command::new(&bin)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SmtError::Spawn {
                bin: bin.clone(),
                source,
            })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(SmtError::Unexpected("solver pipes unavailable".into()));
        };
        ctrl.register_solver(child.id() as i32);
        let trace = match &cfg.trace {
            Some(dir) => Some(BufWriter::new(File::create(
                dir.join(format!("{name}.smt2")),
            )?)),
            None => None,
        };
        debug!("{name}: started {bin} (pid {})", child.id());
        let mut session = Self {
            name,
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            ctrl,
            trace,
            declared: GHashSet::new(),
            defined: GHashSet::new(),
            num_actlits: 0,
            has_model: false,
            statistic: SessionStatistic::default(),
        };
        session.send("(set-option :print-success false)")?;
        session.send("(set-option :produce-models true)")?;
        if let (Solver::Z3, Some(t)) = (cfg.solver, cfg.timeout) {
            session.send(&format!("(set-option :timeout {t})"))?;
        }
        Ok(session)
    }

    fn check_terminated(&self) -> Result<(), SmtError> {
        if self.ctrl.is_terminated() {
            Err(SmtError::Terminated)
        } else {
            Ok(())
        }
    }

    fn io_error(&self, e: io::Error) -> SmtError {
        if self.ctrl.is_terminated() {
            SmtError::Terminated
        } else {
            SmtError::Io(e)
        }
    }

    fn send(&mut self, cmd: &str) -> Result<(), SmtError> {
        trace!("{} <- {cmd}", self.name);
        if let Some(t) = self.trace.as_mut() {
            writeln!(t, "{cmd}")?;
        }
        let res = writeln!(self.stdin, "{cmd}").and_then(|_| self.stdin.flush());
        res.map_err(|e| self.io_error(e))
    }

    fn read(&mut self) -> Result<Sexp, SmtError> {
        let res = match read_sexp(&mut self.stdout) {
            Ok(s) => s,
            Err(_) if self.ctrl.is_terminated() => return Err(SmtError::Terminated),
            Err(SexpError::Eof) => return Err(SmtError::Unexpected("solver exited".into())),
            Err(e) => return Err(e.into()),
        };
        trace!("{} -> {res}", self.name);
        if let Some(t) = self.trace.as_mut() {
            writeln!(t, "; {res}")?;
        }
        if res.head() == Some("error") {
            let msg = res
                .list()
                .and_then(|l| l.get(1))
                .map(|m| m.to_string())
                .unwrap_or_default();
            return Err(SmtError::Solver(msg));
        }
        Ok(res)
    }

    pub fn declare(&mut self, sym: &str, domain: &[Type], range: Type) -> Result<(), SmtError> {
        let mut cmd = format!("(declare-fun {} (", quote(sym));
        for (i, d) in domain.iter().enumerate() {
            if i > 0 {
                cmd.push(' ');
            }
            let _ = write!(cmd, "{d}");
        }
        let _ = write!(cmd, ") {range})");
        self.send(&cmd)
    }

    pub fn declare_svar(&mut self, sv: &SVar, offset: i32) -> Result<(), SmtError> {
        if !self.declared.insert((sv.clone(), offset)) {
            return Ok(());
        }
        let cmd = format!("(declare-fun {} () {})", svar_symbol(sv, offset), sv.ty());
        self.send(&cmd)
    }

    pub fn declare_svars(&mut self, svars: &[SVar], offset: i32) -> Result<(), SmtError> {
        for sv in svars {
            self.declare_svar(sv, offset)?;
        }
        Ok(())
    }

    fn ensure_declared(&mut self, t: &Term) -> Result<(), SmtError> {
        for (sv, o) in t.var_instances() {
            self.declare_svar(&sv, o)?;
        }
        Ok(())
    }

    /// Defines a boolean function. Redefinitions are ignored.
    pub fn define(&mut self, def: &FunDef) -> Result<(), SmtError> {
        if !self.defined.insert(def.name.clone()) {
            return Ok(());
        }
        let mut cmd = format!("(define-fun {} (", quote(&def.name));
        for (i, (p, ty)) in def.params.iter().enumerate() {
            if i > 0 {
                cmd.push(' ');
            }
            let _ = write!(cmd, "({} {ty})", quote(p));
        }
        let _ = write!(cmd, ") Bool {})", def.body);
        self.send(&cmd)
    }

    pub fn assert(&mut self, t: &Term) -> Result<(), SmtError> {
        self.check_terminated()?;
        self.ensure_declared(t)?;
        self.statistic.num_assert += 1;
        self.has_model = false;
        self.send(&format!("(assert {t})"))
    }

    pub fn fresh_actlit(&mut self) -> Result<Actlit, SmtError> {
        let name = format!("{}.act{}", self.name, self.num_actlits);
        self.num_actlits += 1;
        self.statistic.num_actlit += 1;
        self.declare(&name, &[], Type::Bool)?;
        Ok(Actlit(Term::free(&name, Type::Bool)))
    }

    /// Asserts `act => t`.
    pub fn assert_act(&mut self, act: &Actlit, t: &Term) -> Result<(), SmtError> {
        self.assert(&Term::implies(act.term(), t))
    }

    /// Retires an activation literal for good.
    pub fn deactivate(&mut self, act: Actlit) -> Result<(), SmtError> {
        self.assert(&act.term().not())
    }

    /// Checks satisfiability under `assumptions`, which must be literals.
    pub fn check_sat_assuming(&mut self, assumptions: &[Term]) -> Result<SatResult, SmtError> {
        self.check_terminated()?;
        let assumptions: Vec<&Term> = assumptions.iter().filter(|a| !a.is_true()).collect();
        let cmd = if assumptions.is_empty() {
            String::from("(check-sat)")
        } else {
            let mut cmd = String::from("(check-sat-assuming (");
            for (i, a) in assumptions.iter().enumerate() {
                self.ensure_declared(a)?;
                if i > 0 {
                    cmd.push(' ');
                }
                let _ = write!(cmd, "{a}");
            }
            cmd.push_str("))");
            cmd
        };
        let start = Instant::now();
        self.send(&cmd)?;
        let res = self.read()?;
        self.statistic.num_check += 1;
        self.statistic.avg_check_time += start.elapsed();
        let res = match res.atom() {
            Some("sat") => SatResult::Sat,
            Some("unsat") => SatResult::Unsat,
            Some("unknown") if self.ctrl.is_terminated() => return Err(SmtError::Terminated),
            Some("unknown") => return Err(SmtError::Unknown),
            _ => return Err(SmtError::Unexpected(res.to_string())),
        };
        match res {
            SatResult::Sat => self.statistic.sat.success(),
            SatResult::Unsat => self.statistic.sat.fail(),
        }
        self.has_model = res.is_sat();
        Ok(res)
    }

    /// Values of `terms` in the model of the last satisfiable check.
    pub fn get_values(&mut self, terms: &[Term]) -> Result<Vec<Value>, SmtError> {
        if !self.has_model {
            return Err(SmtError::NoModel);
        }
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        self.check_terminated()?;
        let mut cmd = String::from("(get-value (");
        for (i, t) in terms.iter().enumerate() {
            if i > 0 {
                cmd.push(' ');
            }
            let _ = write!(cmd, "{t}");
        }
        cmd.push_str("))");
        self.send(&cmd)?;
        let res = self.read()?;
        let pairs = res
            .list()
            .filter(|l| l.len() == terms.len())
            .ok_or_else(|| SmtError::Unexpected(res.to_string()))?;
        pairs
            .iter()
            .map(|p| {
                p.list()
                    .and_then(|p| p.get(1))
                    .and_then(parse_value)
                    .ok_or_else(|| SmtError::Unexpected(p.to_string()))
            })
            .collect()
    }

    /// Gives `model` the solver's value of every sub-term of `terms` it
    /// cannot evaluate locally. The model must come from the last check.
    pub fn complete(&mut self, model: &mut Model, terms: &[Term]) -> Result<(), SmtError> {
        for t in terms {
            while let Err(EvalError::DivByZero(at)) = model.eval(t) {
                let v = self
                    .get_values(std::slice::from_ref(&at))?
                    .pop()
                    .ok_or_else(|| SmtError::Unexpected(format!("no value for {at}")))?;
                trace!("{}: {at} takes {v} from the solver", self.name);
                model.interpret(at, v);
            }
        }
        Ok(())
    }

    /// Model restricted to the declared instances of `svars` over `offsets`.
    pub fn model(
        &mut self,
        svars: &[SVar],
        offsets: RangeInclusive<i32>,
    ) -> Result<Model, SmtError> {
        let mut keys = Vec::new();
        for o in offsets {
            for sv in svars {
                if self.declared.contains(&(sv.clone(), o)) {
                    keys.push((sv.clone(), o));
                }
            }
        }
        let terms: Vec<Term> = keys.iter().map(|(sv, o)| sv.at(*o)).collect();
        let values = self.get_values(&terms)?;
        let mut model = Model::new();
        for ((sv, o), v) in keys.iter().zip(values) {
            model.insert(sv, *o, v);
        }
        Ok(model)
    }
}

fn parse_value(s: &Sexp) -> Option<Value> {
    match s {
        Sexp::Atom(a) => match a.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            a => a.parse().ok().map(Value::Int),
        },
        Sexp::List(l) => match l.as_slice() {
            [Sexp::Atom(m), v] if m == "-" => match parse_value(v)? {
                Value::Int(i) => i.checked_neg().map(Value::Int),
                Value::Bool(_) => None,
            },
            _ => None,
        },
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = writeln!(self.stdin, "(exit)").and_then(|_| self.stdin.flush());
        if let Some(t) = self.trace.as_mut() {
            let _ = writeln!(t, "(exit)").and_then(|_| t.flush());
        }
        let pid = self.child.id() as i32;
        let exited = self
            .child
            .controlled()
            .time_limit(Duration::from_millis(500))
            .terminate_for_timeout()
            .wait();
        if !matches!(exited, Ok(Some(_))) {
            debug!("{}: solver did not exit, killed", self.name);
        }
        self.ctrl.unregister_solver(pid);
    }
}

/// Whether a solver binary can be started, used to skip solver tests.
pub fn solver_available(cfg: &SmtConfig) -> bool {
    let bin = cfg
        .bin
        .as_ref()
        .map(|b| b.display().to_string())
        .unwrap_or_else(|| match cfg.solver {
            Solver::Z3 => "z3".into(),
            Solver::Cvc5 => "cvc5".into(),
        });
    Command::new(bin)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sexp::parse_one;

    #[test]
    fn values() {
        assert_eq!(
            parse_value(&parse_one("(- 12)").unwrap()),
            Some(Value::Int(-12))
        );
        assert_eq!(parse_value(&parse_one("false").unwrap()), Some(Value::Bool(false)));
        assert_eq!(parse_value(&parse_one("(/ 1 2)").unwrap()), None);
    }

    fn session() -> Option<Session> {
        let cfg = SmtConfig::default();
        if !solver_available(&cfg) {
            eprintln!("z3 not found, skipping");
            return None;
        }
        Session::new(&cfg, "test", EngineCtrl::default()).ok()
    }

    #[test]
    fn actlit_retraction() {
        let Some(mut s) = session() else { return };
        let x = SVar::new("act", "x", Type::Int);
        let a = s.fresh_actlit().unwrap();
        s.assert_act(&a, &Term::gt(&x.at(0), &Term::int(5))).unwrap();
        s.assert(&Term::lt(&x.at(0), &Term::int(3))).unwrap();
        assert_eq!(s.check_sat_assuming(&[a.term().clone()]).unwrap(), SatResult::Unsat);
        let t = a.term().clone();
        s.deactivate(a).unwrap();
        assert_eq!(s.check_sat_assuming(&[]).unwrap(), SatResult::Sat);
        let m = s.model(std::slice::from_ref(&x), 0..=0).unwrap();
        assert!(m.get(&x, 0).and_then(|v| v.as_int()).is_some_and(|v| v < 3));
        // retired literals stay false
        assert_eq!(s.check_sat_assuming(&[t]).unwrap(), SatResult::Unsat);
    }

    #[test]
    fn solver_errors_are_reported() {
        let Some(mut s) = session() else { return };
        s.send("(assert undeclared_symbol)").unwrap();
        assert!(matches!(s.check_sat_assuming(&[]), Err(SmtError::Solver(_))));
    }

    #[test]
    fn terminated_session_refuses_queries() {
        let Some(mut s) = session() else { return };
        s.ctrl.terminate();
        assert!(matches!(s.check_sat_assuming(&[]), Err(SmtError::Terminated)));
    }
}
