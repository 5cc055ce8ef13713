//! parser.rs — Parser descendant récursif à précédence explicite.
//!
//! Chaque niveau de précédence est une fonction qui appelle le niveau
//! immédiatement supérieur pour ses opérandes (sur le modèle du
//! compilateur d'origine, généralisé à toute la grammaire §4.2) :
//! assignation, `??`, `or`, `and`, égalité, comparaison/`is`, bits,
//! intervalle, terme, facteur, puissance, unaire, appel/indice/point,
//! primaire.

use crate::ast::*;
use crate::error::CompileError;
use crate::token::{Token, TokenKind};

pub struct Parser {
    file: String,
    tokens: Vec<Token>,
    pos: usize,
}

type PResult<T> = Result<T, CompileError>;

impl Parser {
    pub fn new(file: &str, mut tokens: Vec<Token>) -> Self {
        strip_newlines_inside_brackets(&mut tokens);
        Self { file: file.to_string(), tokens, pos: 0 }
    }

    pub fn parse_program(mut self) -> PResult<Program> {
        let mut stmts = Vec::new();
        self.skip_terminators();
        while !self.check(&TokenKind::Eof) {
            stmts.push(self.parse_stmt()?);
            self.skip_terminators();
        }
        Ok(Program { stmts })
    }

    // ----- Infrastructure -----

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        self.tokens.get(self.pos + offset).map(|t| &t.kind).unwrap_or(&TokenKind::Eof)
    }

    fn line(&self) -> u32 {
        self.tokens[self.pos].line
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(kind)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn err(&self, message: impl Into<String>) -> CompileError {
        CompileError::Syntax { file: self.file.clone(), line: self.line(), message: message.into() }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.err(format!("attendu {what}, trouvé {:?}", self.peek())))
        }
    }

    fn expect_ident(&mut self) -> PResult<String> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.err(format!("attendu un identifiant, trouvé {other:?}"))),
        }
    }

    fn skip_terminators(&mut self) {
        while matches!(self.peek(), TokenKind::Semicolon | TokenKind::NewLine) {
            self.advance();
        }
    }

    /// Panic-mode : avance jusqu'à un point de synchronisation probable
    /// (début de déclaration, ou terminateur) pour limiter la cascade
    /// d'erreurs après une instruction malformée.
    fn synchronize(&mut self) {
        while !self.check(&TokenKind::Eof) {
            if matches!(self.peek(), TokenKind::Semicolon | TokenKind::NewLine) {
                self.advance();
                return;
            }
            if matches!(
                self.peek(),
                TokenKind::Class
                    | TokenKind::Function
                    | TokenKind::Var
                    | TokenKind::Const
                    | TokenKind::For
                    | TokenKind::If
                    | TokenKind::While
                    | TokenKind::Return
                    | TokenKind::Static
            ) {
                return;
            }
            self.advance();
        }
    }

    // ----- Déclarations / instructions -----

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        let result = self.parse_stmt_inner();
        if result.is_err() {
            self.synchronize();
        }
        result
    }

    fn parse_stmt_inner(&mut self) -> PResult<Stmt> {
        match self.peek().clone() {
            TokenKind::Var | TokenKind::Const => self.parse_var_decl(),
            TokenKind::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for_in(),
            TokenKind::Function => {
                // `function` en tête d'instruction est une déclaration nommée ;
                // en position d'expression (voir `parse_primary`) c'est une lambda.
                self.parse_function_decl()
            }
            TokenKind::Return => self.parse_return(),
            TokenKind::Break => {
                let line = self.line();
                self.advance();
                Ok(Stmt::Break(line))
            }
            TokenKind::Continue => {
                let line = self.line();
                self.advance();
                Ok(Stmt::Continue(line))
            }
            TokenKind::Class => self.parse_class_decl(),
            _ => {
                let expr = self.parse_expr()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_var_decl(&mut self) -> PResult<Stmt> {
        let line = self.line();
        let is_const = matches!(self.peek(), TokenKind::Const);
        self.advance();
        let name = self.expect_ident()?;
        let init = if self.matches(&TokenKind::Equal) { Some(self.parse_expr()?) } else { None };
        Ok(Stmt::VarDecl { name, init, is_const, line })
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        self.skip_terminators();
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.check(&TokenKind::Eof) {
            stmts.push(self.parse_stmt()?);
            self.skip_terminators();
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(stmts)
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect(&TokenKind::LParen, "'(' après if")?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "')' après condition")?;
        let then_branch = Box::new(Stmt::Block(self.parse_block()?));
        self.skip_terminators_peek_only();
        let else_branch = if self.matches(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                Some(Box::new(self.parse_if()?))
            } else {
                Some(Box::new(Stmt::Block(self.parse_block()?)))
            }
        } else {
            None
        };
        Ok(Stmt::If { cond, then_branch, else_branch })
    }

    /// `else` peut suivre un bloc sur sa propre ligne ; on tolère les
    /// terminateurs entre les deux sans les consommer s'il n'y a pas de `else`.
    fn skip_terminators_peek_only(&mut self) {
        let save = self.pos;
        self.skip_terminators();
        if !self.check(&TokenKind::Else) {
            self.pos = save;
        }
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect(&TokenKind::LParen, "'(' après while")?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "')' après condition")?;
        let body = Box::new(Stmt::Block(self.parse_block()?));
        Ok(Stmt::While { cond, body })
    }

    fn parse_for_in(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        self.expect(&TokenKind::LParen, "'(' après for")?;
        let var = self.expect_ident()?;
        self.expect(&TokenKind::In, "'in'")?;
        let iterable = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "')'")?;
        let body = Box::new(Stmt::Block(self.parse_block()?));
        Ok(Stmt::ForIn { var, iterable, body, line })
    }

    fn parse_function_decl(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        let name = self.expect_ident()?;
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(Stmt::Function(FunctionDecl { name, params, body, line }))
    }

    fn parse_params(&mut self) -> PResult<Vec<String>> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                params.push(self.expect_ident()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(params)
    }

    fn parse_return(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        let value = if matches!(self.peek(), TokenKind::Semicolon | TokenKind::NewLine | TokenKind::RBrace | TokenKind::Eof)
        {
            None
        } else {
            Some(self.parse_expr()?)
        };
        Ok(Stmt::Return { value, line })
    }

    fn parse_class_decl(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        let name = self.expect_ident()?;
        let superclass =
            if self.matches(&TokenKind::Less) { Some(self.expect_ident()?) } else { None };
        self.expect(&TokenKind::LBrace, "'{'")?;
        self.skip_terminators();
        let mut methods = Vec::new();
        let mut static_fields = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.check(&TokenKind::Eof) {
            let is_static = self.matches(&TokenKind::Static);
            let kind = if self.matches(&TokenKind::Get) {
                MethodKind::Getter
            } else if self.matches(&TokenKind::Set) {
                MethodKind::Setter
            } else if is_static {
                MethodKind::StaticMethod
            } else {
                MethodKind::Method
            };
            let mline = self.line();
            let member_name = self.expect_ident()?;
            if is_static && self.check(&TokenKind::Equal) {
                self.advance();
                let value = self.parse_expr()?;
                static_fields.push((member_name, value));
            } else {
                let params = self.parse_params()?;
                let body = self.parse_block()?;
                methods.push(MethodDecl { kind, name: member_name, params, body, line: mline });
            }
            self.skip_terminators();
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Stmt::Class(ClassDecl { name, superclass, methods, static_fields, line }))
    }

    // ----- Expressions, du plus lâche au plus lié -----

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        let lhs = self.parse_null_coalesce()?;
        let line = self.line();
        let compound = match self.peek() {
            TokenKind::PlusEqual => Some(BinOp::Add),
            TokenKind::MinusEqual => Some(BinOp::Sub),
            TokenKind::StarEqual => Some(BinOp::Mul),
            TokenKind::SlashEqual => Some(BinOp::Div),
            TokenKind::PercentEqual => Some(BinOp::Mod),
            _ => None,
        };
        if let Some(op) = compound {
            self.advance();
            let value = self.parse_assignment()?;
            return Ok(Expr::CompoundAssign { op, target: Box::new(lhs), value: Box::new(value), line });
        }
        if self.matches(&TokenKind::Equal) {
            let value = Box::new(self.parse_assignment()?);
            return self.build_assign(lhs, value, line);
        }
        Ok(lhs)
    }

    fn build_assign(&self, target: Expr, value: Box<Expr>, line: u32) -> PResult<Expr> {
        match target {
            Expr::Ident(..) => Ok(Expr::Assign { target: Box::new(target), value, line }),
            Expr::Get { receiver, field, .. } => Ok(Expr::Set { receiver, field, value, line }),
            Expr::Index { receiver, index, .. } => Ok(Expr::IndexSet { receiver, index, value, line }),
            _ => Err(self.err("cible d'affectation invalide")),
        }
    }

    fn parse_null_coalesce(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_or()?;
        while self.check(&TokenKind::QuestionQuestion) {
            let line = self.line();
            self.advance();
            let rhs = self.parse_or()?;
            lhs = Expr::Binary { op: BinOp::NullCoalesce, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            let line = self.line();
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary { op: BinOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.check(&TokenKind::And) {
            let line = self.line();
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary { op: BinOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                TokenKind::EqualEqual => BinOp::Eq,
                TokenKind::BangEqual => BinOp::NotEq,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bitor()?;
        loop {
            let op = match self.peek() {
                TokenKind::Greater => BinOp::Greater,
                TokenKind::GreaterEqual => BinOp::GreaterEq,
                TokenKind::Less => BinOp::Less,
                TokenKind::LessEqual => BinOp::LessEq,
                TokenKind::Is => BinOp::Is,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let rhs = self.parse_bitor()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bitxor()?;
        while self.check(&TokenKind::BOr) {
            let line = self.line();
            self.advance();
            let rhs = self.parse_bitxor()?;
            lhs = Expr::Binary { op: BinOp::BOr, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_bitxor(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bitand()?;
        while self.check(&TokenKind::BXor) {
            let line = self.line();
            self.advance();
            let rhs = self.parse_bitand()?;
            lhs = Expr::Binary { op: BinOp::BXor, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_bitand(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_shift()?;
        while self.check(&TokenKind::BAnd) {
            let line = self.line();
            self.advance();
            let rhs = self.parse_shift()?;
            lhs = Expr::Binary { op: BinOp::BAnd, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_range()?;
        loop {
            let op = match self.peek() {
                TokenKind::LShift => BinOp::LShift,
                TokenKind::RShift => BinOp::RShift,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let rhs = self.parse_range()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_range(&mut self) -> PResult<Expr> {
        let lhs = self.parse_term()?;
        if self.check(&TokenKind::DotDot) {
            let line = self.line();
            self.advance();
            let rhs = self.parse_term()?;
            return Ok(Expr::Range { from: Box::new(lhs), to: Box::new(rhs), inclusive: true, line });
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let rhs = self.parse_factor()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_power()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                TokenKind::SlashSlash => BinOp::FloorDiv,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let rhs = self.parse_power()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        let lhs = self.parse_unary()?;
        if self.check(&TokenKind::StarStar) {
            let line = self.line();
            self.advance();
            let rhs = self.parse_power()?; // right-assoc
            return Ok(Expr::Binary { op: BinOp::Pow, lhs: Box::new(lhs), rhs: Box::new(rhs), line });
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            TokenKind::Bang => Some(UnOp::Not),
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::BNot => Some(UnOp::BNot),
            _ => None,
        };
        if let Some(op) = op {
            let line = self.line();
            self.advance();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary { op, expr: Box::new(expr), line });
        }
        self.parse_call()
    }

    fn parse_call(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                TokenKind::LParen => {
                    let line = self.line();
                    let args = self.parse_args()?;
                    expr = match expr {
                        Expr::Get { receiver, field, .. } => {
                            Expr::Invoke { receiver, method: field, args, line }
                        }
                        other => Expr::Call { callee: Box::new(other), args, line },
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let line = self.line();
                    let field = self.expect_ident()?;
                    expr = Expr::Get { receiver: Box::new(expr), field, line };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let line = self.line();
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket, "']'")?;
                    expr = Expr::Index { receiver: Box::new(expr), index: Box::new(index), line };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> PResult<Vec<Expr>> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(args)
    }

    /// Détecte une lambda `(params) => expr` en pré-scannant les jetons
    /// jusqu'à la parenthèse fermante correspondante : si elle est suivie
    /// de `=>`, c'est une lambda : sinon, groupement/appel ordinaire.
    fn looks_like_lambda_params(&self) -> bool {
        let mut depth = 0i32;
        let mut i = self.pos;
        loop {
            match self.tokens.get(i).map(|t| &t.kind) {
                Some(TokenKind::LParen) => depth += 1,
                Some(TokenKind::RParen) => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(i + 1).map(|t| &t.kind),
                            Some(TokenKind::Arrow)
                        );
                    }
                }
                Some(TokenKind::Eof) | None => return false,
                _ => {}
            }
            i += 1;
        }
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let line = self.line();
        match self.peek().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n, line))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true, line))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false, line))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Null(line))
            }
            TokenKind::This => {
                self.advance();
                Ok(Expr::This(line))
            }
            TokenKind::Super => {
                self.advance();
                self.expect(&TokenKind::Dot, "'.' après super")?;
                let method = self.expect_ident()?;
                Ok(Expr::Super { method, line })
            }
            TokenKind::New => {
                self.advance();
                let class = self.parse_call()?;
                match class {
                    Expr::Call { callee, args, line } => Ok(Expr::New { class: callee, args, line }),
                    other => Ok(Expr::New { class: Box::new(other), args: Vec::new(), line }),
                }
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::StringInterp(vec![StringPart::Lit(s)], line))
            }
            TokenKind::StrPart(_) => self.parse_string_interp(),
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Ident(name, line))
            }
            TokenKind::Function => {
                self.advance();
                let params = self.parse_params()?;
                let body = self.parse_block()?;
                Ok(Expr::Lambda { params, body, line })
            }
            TokenKind::LParen => {
                if self.looks_like_lambda_params() {
                    let params = self.parse_params()?;
                    self.expect(&TokenKind::Arrow, "'=>'")?;
                    let body = if self.check(&TokenKind::LBrace) {
                        self.parse_block()?
                    } else {
                        vec![Stmt::Return { value: Some(self.parse_expr()?), line }]
                    };
                    return Ok(Expr::Lambda { params, body, line });
                }
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(Expr::Grouping(Box::new(inner)))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elems = Vec::new();
                if !self.check(&TokenKind::RBracket) {
                    loop {
                        elems.push(self.parse_expr()?);
                        if !self.matches(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBracket, "']'")?;
                Ok(Expr::Array(elems, line))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                if !self.check(&TokenKind::RBrace) {
                    loop {
                        let key = self.parse_expr()?;
                        self.expect(&TokenKind::Colon, "':'")?;
                        let value = self.parse_expr()?;
                        entries.push((key, value));
                        if !self.matches(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBrace, "'}'")?;
                Ok(Expr::Map(entries, line))
            }
            other => Err(self.err(format!("expression inattendue: {other:?}"))),
        }
    }

    fn parse_string_interp(&mut self) -> PResult<Expr> {
        let line = self.line();
        let mut parts = Vec::new();
        loop {
            match self.peek().clone() {
                TokenKind::StrPart(s) => {
                    self.advance();
                    parts.push(StringPart::Lit(s));
                    let expr = self.parse_expr()?;
                    parts.push(StringPart::Interp(expr));
                }
                TokenKind::Str(s) => {
                    self.advance();
                    parts.push(StringPart::Lit(s));
                    break;
                }
                other => return Err(self.err(format!("chaîne interpolée malformée: {other:?}"))),
            }
        }
        Ok(Expr::StringInterp(parts, line))
    }
}

/// Les retours à la ligne ne séparent des instructions qu'au niveau
/// d'imbrication zéro d'appels/indices : à l'intérieur de `(...)`/`[...]`
/// ils sont des espaces ordinaires (permet de continuer une expression
/// sur plusieurs lignes dans un appel ou une liste).
fn strip_newlines_inside_brackets(tokens: &mut Vec<Token>) {
    let mut depth = 0i32;
    tokens.retain(|t| match t.kind {
        TokenKind::LParen | TokenKind::LBracket => {
            depth += 1;
            true
        }
        TokenKind::RParen | TokenKind::RBracket => {
            depth -= 1;
            true
        }
        TokenKind::NewLine => depth <= 0,
        _ => true,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;

    fn parse(src: &str) -> Program {
        let tokens = Scanner::new("<test>", src).tokenize().unwrap();
        Parser::new("<test>", tokens).parse_program().unwrap()
    }

    #[test]
    fn parses_var_and_binary() {
        let prog = parse("var x = 1 + 2 * 3;");
        assert_eq!(prog.stmts.len(), 1);
        match &prog.stmts[0] {
            Stmt::VarDecl { name, init: Some(_), .. } => assert_eq!(name, "x"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_if_else_and_while() {
        let prog = parse("if (x) { print(1); } else { print(2); }\nwhile (x) { x = x - 1; }");
        assert_eq!(prog.stmts.len(), 2);
        assert!(matches!(prog.stmts[0], Stmt::If { .. }));
        assert!(matches!(prog.stmts[1], Stmt::While { .. }));
    }

    #[test]
    fn parses_class_with_superclass_and_methods() {
        let prog = parse(
            "class Animal { speak() { return 1; } }\nclass Dog < Animal { speak() { return 2; } }",
        );
        assert_eq!(prog.stmts.len(), 2);
        match &prog.stmts[1] {
            Stmt::Class(c) => {
                assert_eq!(c.name, "Dog");
                assert_eq!(c.superclass.as_deref(), Some("Animal"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_lambda_arrow_and_function_literal() {
        let prog = parse("var f = (a, b) => a + b;\nvar g = function(a) { return a; };");
        assert!(matches!(&prog.stmts[0], Stmt::VarDecl { init: Some(Expr::Lambda { .. }), .. }));
        assert!(matches!(&prog.stmts[1], Stmt::VarDecl { init: Some(Expr::Lambda { .. }), .. }));
    }

    #[test]
    fn parses_for_in() {
        let prog = parse("for (x in range) { print(x); }");
        assert!(matches!(prog.stmts[0], Stmt::ForIn { .. }));
    }

    #[test]
    fn multiline_call_args_ignore_newlines() {
        let prog = parse("foo(\n1,\n2\n);");
        assert_eq!(prog.stmts.len(), 1);
    }
}
