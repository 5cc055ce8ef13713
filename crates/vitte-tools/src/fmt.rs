//! fmt.rs — reformatage canonique d'une source `.vit`.
//!
//! Reparse la source avec `vitte_compiler::parse` (scanner + parser, sans
//! émission de bytecode — exactement le point d'entrée que le compilateur
//! documente pour « les outils qui n'ont besoin que de l'AST ») puis
//! réimprime l'AST avec une mise en forme canonique : 2 espaces par niveau
//! d'indentation, une accolade ouvrante sur la ligne de l'en-tête, un
//! point-virgule après chaque instruction simple.

use vitte_compiler::ast::{BinOp, ClassDecl, Expr, FunctionDecl, MethodDecl, MethodKind, Program, Stmt, StringPart, UnOp};
use vitte_compiler::Result;

const INDENT: &str = "  ";

/// Reformate `src` et renvoie la version canonique, ou une erreur de
/// compilation si `src` ne parse pas.
pub fn format_source(file: &str, src: &str) -> Result<String> {
    let program = vitte_compiler::parse(file, src)?;
    let mut out = String::new();
    print_program(&program, &mut out);
    Ok(out)
}

fn print_program(program: &Program, out: &mut String) {
    for (i, stmt) in program.stmts.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        print_stmt(stmt, 0, out);
    }
}

fn push_indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn print_block(body: &[Stmt], depth: usize, out: &mut String) {
    out.push_str("{\n");
    for stmt in body {
        print_stmt(stmt, depth + 1, out);
    }
    push_indent(depth, out);
    out.push('}');
}

fn print_stmt(stmt: &Stmt, depth: usize, out: &mut String) {
    push_indent(depth, out);
    match stmt {
        Stmt::Expr(expr) => {
            out.push_str(&print_expr(expr));
            out.push_str(";\n");
        }
        Stmt::VarDecl { name, init, is_const, .. } => {
            out.push_str(if *is_const { "const " } else { "var " });
            out.push_str(name);
            if let Some(value) = init {
                out.push_str(" = ");
                out.push_str(&print_expr(value));
            }
            out.push_str(";\n");
        }
        Stmt::Block(body) => {
            print_block(body, depth, out);
            out.push('\n');
        }
        Stmt::If { cond, then_branch, else_branch } => {
            out.push_str("if (");
            out.push_str(&print_expr(cond));
            out.push_str(") ");
            print_inline_stmt(then_branch, depth, out);
            if let Some(else_branch) = else_branch {
                out.push_str(" else ");
                print_inline_stmt(else_branch, depth, out);
            }
            out.push('\n');
        }
        Stmt::While { cond, body } => {
            out.push_str("while (");
            out.push_str(&print_expr(cond));
            out.push_str(") ");
            print_inline_stmt(body, depth, out);
            out.push('\n');
        }
        Stmt::ForIn { var, iterable, body, .. } => {
            out.push_str("for (");
            out.push_str(var);
            out.push_str(" in ");
            out.push_str(&print_expr(iterable));
            out.push_str(") ");
            print_inline_stmt(body, depth, out);
            out.push('\n');
        }
        Stmt::Function(decl) => {
            print_function(decl, depth, out);
            out.push('\n');
        }
        Stmt::Return { value, .. } => {
            out.push_str("return");
            if let Some(value) = value {
                out.push(' ');
                out.push_str(&print_expr(value));
            }
            out.push_str(";\n");
        }
        Stmt::Break(_) => out.push_str("break;\n"),
        Stmt::Continue(_) => out.push_str("continue;\n"),
        Stmt::Class(decl) => {
            print_class(decl, depth, out);
            out.push('\n');
        }
    }
}

/// Imprime un `if`/`while`/`for` dont le corps est un bloc comme `{ ... }`
/// sans nouvelle indentation devant l'accolade (elle suit déjà l'en-tête).
fn print_inline_stmt(stmt: &Stmt, depth: usize, out: &mut String) {
    match stmt {
        Stmt::Block(body) => print_block(body, depth, out),
        other => {
            let mut inner = String::new();
            print_stmt(other, depth + 1, &mut inner);
            out.push_str("{\n");
            out.push_str(&inner);
            push_indent(depth, out);
            out.push('}');
        }
    }
}

fn print_function(decl: &FunctionDecl, depth: usize, out: &mut String) {
    out.push_str("function ");
    out.push_str(&decl.name);
    out.push('(');
    out.push_str(&decl.params.join(", "));
    out.push_str(") ");
    print_block(&decl.body, depth, out);
}

fn print_class(decl: &ClassDecl, depth: usize, out: &mut String) {
    out.push_str("class ");
    out.push_str(&decl.name);
    if let Some(superclass) = &decl.superclass {
        out.push_str(" < ");
        out.push_str(superclass);
    }
    out.push_str(" {\n");
    for (name, value) in &decl.static_fields {
        push_indent(depth + 1, out);
        out.push_str("static ");
        out.push_str(name);
        out.push_str(" = ");
        out.push_str(&print_expr(value));
        out.push_str(";\n");
    }
    for method in &decl.methods {
        print_method(method, depth + 1, out);
        out.push('\n');
    }
    push_indent(depth, out);
    out.push('}');
}

fn print_method(method: &MethodDecl, depth: usize, out: &mut String) {
    push_indent(depth, out);
    match method.kind {
        MethodKind::Method => {}
        MethodKind::StaticMethod => out.push_str("static "),
        MethodKind::Getter => out.push_str("get "),
        MethodKind::Setter => out.push_str("set "),
    }
    out.push_str(&method.name);
    out.push('(');
    out.push_str(&method.params.join(", "));
    out.push_str(") ");
    print_block(&method.body, depth, out);
}

fn print_expr(expr: &Expr) -> String {
    match expr {
        Expr::Number(n, _) => format_number(*n),
        Expr::StringInterp(parts, _) => print_string_interp(parts),
        Expr::Bool(b, _) => b.to_string(),
        Expr::Null(_) => "null".to_string(),
        Expr::This(_) => "this".to_string(),
        Expr::Super { method, .. } => format!("super.{method}"),
        Expr::Ident(name, _) => name.clone(),
        Expr::Unary { op, expr, .. } => format!("{}{}", unop_str(*op), print_expr(expr)),
        Expr::Binary { op, lhs, rhs, .. } => {
            format!("{} {} {}", print_expr(lhs), binop_str(*op), print_expr(rhs))
        }
        Expr::Assign { target, value, .. } => format!("{} = {}", print_expr(target), print_expr(value)),
        Expr::CompoundAssign { op, target, value, .. } => {
            format!("{} {}= {}", print_expr(target), binop_str(*op), print_expr(value))
        }
        Expr::Call { callee, args, .. } => format!("{}({})", print_expr(callee), print_args(args)),
        Expr::Invoke { receiver, method, args, .. } => {
            format!("{}.{}({})", print_expr(receiver), method, print_args(args))
        }
        Expr::Get { receiver, field, .. } => format!("{}.{}", print_expr(receiver), field),
        Expr::Set { receiver, field, value, .. } => {
            format!("{}.{} = {}", print_expr(receiver), field, print_expr(value))
        }
        Expr::Index { receiver, index, .. } => format!("{}[{}]", print_expr(receiver), print_expr(index)),
        Expr::IndexSet { receiver, index, value, .. } => {
            format!("{}[{}] = {}", print_expr(receiver), print_expr(index), print_expr(value))
        }
        Expr::Array(items, _) => format!("[{}]", print_args(items)),
        Expr::Map(entries, _) => {
            let parts: Vec<String> =
                entries.iter().map(|(k, v)| format!("{}: {}", print_expr(k), print_expr(v))).collect();
            format!("{{{}}}", parts.join(", "))
        }
        Expr::Range { from, to, inclusive, .. } => {
            format!("{}{}{}", print_expr(from), if *inclusive { "..=" } else { ".." }, print_expr(to))
        }
        Expr::Lambda { params, body, .. } => {
            let mut inner = String::new();
            print_block(body, 0, &mut inner);
            format!("({}) => {}", params.join(", "), inner)
        }
        Expr::New { class, args, .. } => format!("new {}({})", print_expr(class), print_args(args)),
        Expr::Grouping(inner) => format!("({})", print_expr(inner)),
    }
}

fn print_args(args: &[Expr]) -> String {
    args.iter().map(print_expr).collect::<Vec<_>>().join(", ")
}

fn print_string_interp(parts: &[StringPart]) -> String {
    let mut body = String::new();
    for part in parts {
        match part {
            StringPart::Lit(lit) => body.push_str(&escape_literal(lit)),
            StringPart::Interp(expr) => {
                body.push_str("\\(");
                body.push_str(&print_expr(expr));
                body.push(')');
            }
        }
    }
    format!("\"{body}\"")
}

/// Ré-échappe un segment littéral décodé par le scanner (`\n`, `\t`, `"`,
/// `\`) pour qu'il redevienne une source `.vit` valide une fois réimprimé.
fn escape_literal(lit: &str) -> String {
    let mut out = String::with_capacity(lit.len());
    for c in lit.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

fn unop_str(op: UnOp) -> &'static str {
    match op {
        UnOp::Neg => "-",
        UnOp::Not => "!",
        UnOp::BNot => "~",
    }
}

fn binop_str(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
        BinOp::FloorDiv => "//",
        BinOp::Eq => "==",
        BinOp::NotEq => "!=",
        BinOp::Greater => ">",
        BinOp::GreaterEq => ">=",
        BinOp::Less => "<",
        BinOp::LessEq => "<=",
        BinOp::LShift => "<<",
        BinOp::RShift => ">>",
        BinOp::BAnd => "&",
        BinOp::BOr => "|",
        BinOp::BXor => "^",
        BinOp::Is => "is",
        BinOp::And => "&&",
        BinOp::Or => "||",
        BinOp::NullCoalesce => "??",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reformats_sloppy_spacing_into_canonical_form() {
        let src = "function add(a,b){return a+b;}";
        let formatted = format_source("<test>", src).unwrap();
        assert_eq!(formatted, "function add(a, b) {\n  return a + b;\n}\n");
    }

    #[test]
    fn reformatting_is_idempotent() {
        let src = "class Animal { speak() { return \"...\"; } }";
        let once = format_source("<test>", src).unwrap();
        let twice = format_source("<test>", &once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn surfaces_syntax_errors_instead_of_panicking() {
        assert!(format_source("<test>", "var = ;").is_err());
    }
}
