#![forbid(unsafe_code)]

use std::fmt::{self, Write};

use crate::{Atom, Equation, LiteralValue, Param, SubProgram, Var};

fn var_decl(v: &Var) -> String {
    format!("%{}:{}", v.id.0, v.aval)
}

fn atom(a: &Atom) -> String {
    match a {
        Atom::Var(v) => format!("%{}", v.id.0),
        Atom::Lit(l) => {
            let dtype = l.aval.dtype().map(|d| d.name()).unwrap_or("?");
            match l.value {
                LiteralValue::Int(i) => format!("{i}:{dtype}"),
                LiteralValue::Float(x) => format!("{x:?}:{dtype}"),
                LiteralValue::Bool(b) => format!("{b}:{dtype}"),
            }
        }
    }
}

fn join<T>(items: &[T], f: impl Fn(&T) -> String, sep: &str) -> String {
    items.iter().map(f).collect::<Vec<_>>().join(sep)
}

fn write_program(out: &mut String, p: &SubProgram, indent: usize) -> fmt::Result {
    let pad = " ".repeat(indent);
    writeln!(
        out,
        "{{ lambda {} ; {} . let",
        join(&p.constvars, var_decl, " "),
        join(&p.invars, var_decl, " ")
    )?;
    for eqn in &p.eqns {
        write_eqn(out, eqn, indent + 4)?;
    }
    write!(out, "{pad}  in ({}) }}", join(&p.outvars, atom, ", "))?;
    if !p.effects.is_empty() {
        let effs = p.effects.iter().map(|e| e.to_string()).collect::<Vec<_>>();
        write!(out, " effects={{{}}}", effs.join(", "))?;
    }
    Ok(())
}

fn write_eqn(out: &mut String, eqn: &Equation, indent: usize) -> fmt::Result {
    let pad = " ".repeat(indent);
    let lhs = if eqn.outputs.is_empty() {
        "_".to_string()
    } else {
        join(&eqn.outputs, var_decl, " ")
    };
    write!(out, "{pad}{lhs} = {}", eqn.primitive.name)?;

    if !eqn.params.is_empty() {
        out.push('[');
        for (i, (k, v)) in eqn.params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write!(out, "{k}=")?;
            match v {
                Param::Int(x) => write!(out, "{x}")?,
                Param::Bool(b) => write!(out, "{b}")?,
                Param::Str(s) => write!(out, "{s:?}")?,
                Param::Tree(t) => write!(out, "{t}")?,
                Param::Program(p) => write_program(out, p, indent + 2)?,
            }
        }
        out.push(']');
    }

    if !eqn.inputs.is_empty() {
        write!(out, " {}", join(&eqn.inputs, atom, " "))?;
    }
    out.push('\n');
    Ok(())
}

impl fmt::Display for SubProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_program(&mut out, self, 0)?;
        f.write_str(&out)
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_eqn(&mut out, self, 0)?;
        f.write_str(out.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn prints_nested_program() {
        let mut ids = IdGen::default();
        let buf = ids.fresh_var(AbstractValue::buffer([8], DType::F32, MemorySpace::Vmem));
        let sem = ids.fresh_var(AbstractValue::semaphore(SemaphoreKind::Regular));
        let inner = SubProgram {
            constvars: vec![buf.clone()],
            invars: vec![sem.clone()],
            eqns: vec![Equation {
                primitive: Primitive::multi("semaphore_signal"),
                inputs: vec![Atom::from(&sem), Atom::from(1)],
                outputs: vec![],
                params: Params::new(),
                effects: EffectSet::new(),
            }],
            ..SubProgram::default()
        };
        let outer = SubProgram {
            invars: vec![buf.clone()],
            eqns: vec![Equation {
                primitive: Primitive::multi("run_scoped"),
                inputs: vec![Atom::from(&buf)],
                outputs: vec![],
                params: Params::new().with("program", Param::Program(Box::new(inner))),
                effects: EffectSet::new(),
            }],
            ..SubProgram::default()
        };

        let text = outer.to_string();
        assert!(text.starts_with("{ lambda  ; %0:Ref{vmem}<f32[8]> . let"), "{text}");
        assert!(text.contains("_ = semaphore_signal %1 1:i32"), "{text}");
        assert!(text.contains("_ = run_scoped[program={ lambda %0:Ref{vmem}<f32[8]> ; %1:sem<REGULAR> . let"), "{text}");
        assert!(text.ends_with("in () }"), "{text}");
    }
}
