use super::{SVar, Term, TermNode};
use std::fmt::{self, Display, Write};

/// SMT-LIB symbol of a state variable instance.
pub fn svar_symbol(sv: &SVar, offset: i32) -> String {
    format!("|{}.{}@{}|", sv.scope(), sv.name(), offset)
}

#[inline]
pub fn quote(name: &str) -> String {
    format!("|{name}|")
}

fn write_term(t: &Term, f: &mut impl Write) -> fmt::Result {
    match t.node() {
        TermNode::Bool(b) => write!(f, "{b}"),
        TermNode::Int(i) if *i < 0 => write!(f, "(- {})", i.unsigned_abs()),
        TermNode::Int(i) => write!(f, "{i}"),
        TermNode::Var(sv, o) => f.write_str(&svar_symbol(sv, *o)),
        TermNode::Free(name, _) => f.write_str(&quote(name)),
        TermNode::App(op, args) => {
            write!(f, "({}", op.symbol())?;
            for a in args {
                f.write_char(' ')?;
                write_term(a, f)?;
            }
            f.write_char(')')
        }
        TermNode::Call(name, args) => {
            write!(f, "({}", quote(name))?;
            for a in args {
                f.write_char(' ')?;
                write_term(a, f)?;
            }
            f.write_char(')')
        }
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_term(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Type;

    #[test]
    fn prints_smtlib() {
        let x = SVar::new("sys", "x", Type::Int);
        let t = Term::le(&x.at(1), &Term::int(-4));
        assert_eq!(t.to_string(), "(<= |sys.x@1| (- 4))");
        let c = Term::call("sys.trans", vec![x.at(0), x.at(1)]);
        assert_eq!(c.to_string(), "(|sys.trans| |sys.x@0| |sys.x@1|)");
    }
}
