use super::{Frontend, FrontendError};
use crate::{
    config::Config,
    sexp::{self, Sexp},
    term::{Op, SVar, Term, Type, Value},
    transys::{
        Instance, TransSys,
        property::{Cex, Property},
    },
};
use giputils::hash::GHashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::{self, Read},
    path::Path,
    sync::Arc,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    Bool,
    Int,
}

impl From<VarType> for Type {
    fn from(t: VarType) -> Self {
        match t {
            VarType::Bool => Type::Bool,
            VarType::Int => Type::Int,
        }
    }
}

fn truth() -> String {
    "true".into()
}

/// Instantiation of an earlier system. Callee variables missing from `map`
/// are bound to a caller variable named `<instance>.<var>`, declared on the
/// fly.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceDesc {
    pub name: String,
    pub system: String,
    #[serde(default)]
    pub map: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemDesc {
    pub name: String,
    #[serde(default)]
    pub vars: BTreeMap<String, VarType>,
    #[serde(default = "truth")]
    pub init: String,
    /// May refer to next-state values with `(next x)`.
    #[serde(default = "truth")]
    pub trans: String,
    #[serde(default)]
    pub props: BTreeMap<String, String>,
    #[serde(default, rename = "instance")]
    pub instances: Vec<InstanceDesc>,
}

/// A model file: systems listed callees first.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelFile {
    #[serde(default, rename = "system")]
    pub systems: Vec<SystemDesc>,
}

struct Env<'a> {
    system: &'a str,
    vars: &'a GHashMap<String, SVar>,
    next: bool,
}

impl Env<'_> {
    fn invalid(&self, msg: String) -> FrontendError {
        FrontendError::Invalid {
            system: self.system.to_string(),
            msg,
        }
    }

    fn term(&self, s: &Sexp) -> Result<Term, FrontendError> {
        let list = match s {
            Sexp::Atom(a) => return self.atom(s, a),
            Sexp::List(l) => l,
        };
        let Some((head, args)) = list.split_first() else {
            return Err(self.invalid("empty application".into()));
        };
        let Some(head) = head.atom() else {
            return Err(self.invalid(format!("bad operator in {s}")));
        };
        if head == "next" {
            let [arg] = args else {
                return Err(self.invalid(format!("`next` takes one argument in {s}")));
            };
            if !self.next {
                return Err(self.invalid(format!("{s} outside of the transition relation")));
            }
            let t = self.term(arg)?;
            if t.offsets().is_some_and(|(_, hi)| hi > 0) {
                return Err(self.invalid(format!("nested `next` in {s}")));
            }
            return Ok(t.bump(1));
        }
        let Some(op) = Op::from_symbol(head) else {
            return Err(self.invalid(format!("unknown operator `{head}`")));
        };
        let args = args
            .iter()
            .map(|a| self.term(a))
            .collect::<Result<Vec<_>, _>>()?;
        Term::try_app(op, args).map_err(|source| FrontendError::Term {
            system: self.system.to_string(),
            source,
        })
    }

    fn atom(&self, s: &Sexp, a: &str) -> Result<Term, FrontendError> {
        match a {
            "true" => return Ok(Term::bool(true)),
            "false" => return Ok(Term::bool(false)),
            _ => (),
        }
        if let Ok(i) = a.parse::<i64>() {
            return Ok(Term::int(i));
        }
        let name = s.symbol().unwrap_or(a);
        self.vars
            .get(name)
            .map(|sv| sv.at(0))
            .ok_or_else(|| self.invalid(format!("unknown variable `{name}`")))
    }

    fn formula(&self, what: &str, src: &str) -> Result<Term, FrontendError> {
        let s = sexp::parse_one(src).map_err(|source| FrontendError::Sexp {
            system: self.system.to_string(),
            source,
        })?;
        let t = self.term(&s)?;
        if t.ty() != Type::Bool {
            return Err(self.invalid(format!("{what} `{s}` is not a formula")));
        }
        Ok(t)
    }
}

impl ModelFile {
    pub fn parse(src: &str) -> Result<Self, FrontendError> {
        Ok(toml::from_str(src)?)
    }

    fn build_system(
        desc: &SystemDesc,
        built: &GHashMap<String, Arc<TransSys>>,
    ) -> Result<TransSys, FrontendError> {
        let invalid = |msg: String| FrontendError::Invalid {
            system: desc.name.clone(),
            msg,
        };
        let mut svars = Vec::new();
        let mut vars = GHashMap::new();
        for (name, ty) in desc.vars.iter() {
            let sv = SVar::new(&desc.name, name, (*ty).into());
            vars.insert(name.clone(), sv.clone());
            svars.push(sv);
        }
        let mut subsystems = Vec::new();
        let mut init_calls = Vec::new();
        let mut trans_calls = Vec::new();
        for inst in desc.instances.iter() {
            let callee = built
                .get(&inst.system)
                .ok_or_else(|| invalid(format!("instance of unknown system `{}`", inst.system)))?
                .clone();
            for name in inst.map.keys() {
                if !callee.svars.iter().any(|s| s.name() == name) {
                    return Err(invalid(format!("`{}` has no variable `{name}`", callee.name)));
                }
            }
            let mut map = GHashMap::new();
            for csv in callee.svars.iter() {
                let name = inst
                    .map
                    .get(csv.name())
                    .cloned()
                    .unwrap_or_else(|| format!("{}.{}", inst.name, csv.name()));
                let sv = vars
                    .entry(name.clone())
                    .or_insert_with(|| {
                        let sv = SVar::new(&desc.name, &name, csv.ty());
                        svars.push(sv.clone());
                        sv
                    })
                    .clone();
                if sv.ty() != csv.ty() {
                    return Err(invalid(format!(
                        "`{name}` bound to `{}.{}` of another type",
                        inst.name,
                        csv.name()
                    )));
                }
                map.insert(csv.clone(), sv);
            }
            let bound = &map;
            let args = |o: i32| callee.svars.iter().map(move |s| bound[s].at(o));
            init_calls.push(Term::call(&callee.init_fun(), args(0).collect()));
            trans_calls.push(Term::call(&callee.trans_fun(), args(0).chain(args(1)).collect()));
            subsystems.push(Instance {
                name: inst.name.clone(),
                sys: callee,
                map,
            });
        }
        let env = Env {
            system: &desc.name,
            vars: &vars,
            next: false,
        };
        let init = env.formula("init", &desc.init)?;
        let props = desc
            .props
            .iter()
            .map(|(name, src)| -> Result<Property, FrontendError> {
                Ok(Property::new(name, env.formula("property", src)?))
            })
            .collect::<Result<Vec<_>, FrontendError>>()?;
        let trans = Env { next: true, ..env }.formula("trans", &desc.trans)?;
        Ok(TransSys {
            name: desc.name.clone(),
            svars,
            init: Term::and(std::iter::once(init).chain(init_calls)),
            trans: Term::and(std::iter::once(trans).chain(trans_calls)),
            props,
            subsystems,
        })
    }

    /// Builds every system and returns `top`, by default the last one.
    pub fn build(&self, top: Option<&str>) -> Result<Arc<TransSys>, FrontendError> {
        let mut built: GHashMap<String, Arc<TransSys>> = GHashMap::new();
        let mut last = None;
        for desc in self.systems.iter() {
            if built.contains_key(&desc.name) {
                return Err(FrontendError::Invalid {
                    system: desc.name.clone(),
                    msg: "defined twice".into(),
                });
            }
            let sys = Arc::new(Self::build_system(desc, &built)?);
            debug!(
                "system {} has {} variable(s) and {} instance(s)",
                sys.name,
                sys.svars.len(),
                sys.subsystems.len()
            );
            built.insert(desc.name.clone(), sys.clone());
            last = Some(sys);
        }
        match top {
            Some(name) => built
                .remove(name)
                .ok_or_else(|| FrontendError::UnknownSystem(name.into())),
            None => last.ok_or(FrontendError::Empty),
        }
    }
}

#[derive(Serialize)]
struct Witness<'a> {
    property: &'a str,
    length: usize,
    step: &'a [BTreeMap<String, Value>],
}

pub struct TomlFrontend {
    ts: Arc<TransSys>,
}

impl TomlFrontend {
    pub fn new(cfg: &Config) -> Result<Self, FrontendError> {
        let src = if cfg.model == Path::new("-") {
            let mut src = String::new();
            io::stdin().read_to_string(&mut src)?;
            src
        } else {
            fs::read_to_string(&cfg.model)?
        };
        let ts = ModelFile::parse(&src)?.build(cfg.top.as_deref())?;
        info!("top system {} with {} property(ies)", ts.name, ts.props.len());
        Ok(Self { ts })
    }
}

impl Frontend for TomlFrontend {
    fn ts(&self) -> Arc<TransSys> {
        self.ts.clone()
    }

    fn witness(&self, prop: &str, cex: &Cex) -> String {
        let w = Witness {
            property: prop,
            length: cex.len(),
            step: &cex.states,
        };
        toml::to_string(&w).unwrap_or_else(|e| format!("# cannot render counterexample: {e}\n"))
    }
}
