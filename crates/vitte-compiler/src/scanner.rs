//! scanner.rs — Transforme le texte source en flux de [`Token`].
//!
//! Un scanner `logos` ne convient pas ici : l'interpolation de chaînes
//! (`"valeur = \(x + 1)"`) a besoin de rebasculer entre mode "chaîne" et
//! mode "expression" avec une pile de profondeur, ce qu'un générateur de
//! lexer piloté par des regex ne modélise pas naturellement. Le scanner
//! est donc écrit à la main, sur le modèle `CharIndices`
//! bump/peek/peek2 habituel.

use crate::error::CompileError;
use crate::token::{Token, TokenKind};

/// Profondeur maximale d'imbrication des interpolations (`"\(a + "\(b)")"`).
const MAX_INTERPOLATION_NESTING: usize = 4;

pub struct Scanner<'a> {
    file: String,
    src: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: u32,
    /// Pour chaque interpolation ouverte : la profondeur de parenthèses
    /// imbriquées *à l'intérieur* de l'expression d'interpolation, pour
    /// savoir quelle `)` referme l'interpolation plutôt qu'un appel.
    interp_parens: Vec<u32>,
}

impl<'a> Scanner<'a> {
    pub fn new(file: &str, src: &'a str) -> Self {
        Self {
            file: file.to_string(),
            src,
            chars: src.char_indices().peekable(),
            line: 1,
            interp_parens: Vec::new(),
        }
    }

    fn err(&self, message: impl Into<String>) -> CompileError {
        CompileError::Syntax { file: self.file.clone(), line: self.line, message: message.into() }
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn peek_at(&self, rest: &str, n: usize) -> Option<char> {
        rest.chars().nth(n)
    }

    fn rest(&self) -> &'a str {
        match self.chars.peek() {
            Some(&(i, _)) => &self.src[i..],
            None => "",
        }
    }

    fn advance_if(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.bump();
                }
                Some('/') => {
                    let rest = self.rest();
                    if self.peek_at(rest, 1) == Some('/') {
                        while let Some(c) = self.peek() {
                            if c == '\n' {
                                break;
                            }
                            self.bump();
                        }
                    } else if self.peek_at(rest, 1) == Some('*') {
                        self.bump();
                        self.bump();
                        loop {
                            match self.peek() {
                                None => break,
                                Some('*') => {
                                    let rest = self.rest();
                                    if self.peek_at(rest, 1) == Some('/') {
                                        self.bump();
                                        self.bump();
                                        break;
                                    }
                                    self.bump();
                                }
                                _ => {
                                    self.bump();
                                }
                            }
                        }
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    /// Tokenise la totalité du source. Les retours à la ligne sont
    /// significatifs (terminaison implicite des déclarations) : ils sont
    /// émis comme [`TokenKind::NewLine`] plutôt qu'absorbés comme du blanc.
    pub fn tokenize(mut self) -> Result<Vec<Token>, CompileError> {
        let mut out = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = matches!(tok.kind, TokenKind::Eof);
            out.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(out)
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        self.skip_ws_and_comments();
        let line = self.line;
        let Some(c) = self.peek() else {
            return Ok(Token::new(TokenKind::Eof, line));
        };

        if c == '\n' {
            self.bump();
            return Ok(Token::new(TokenKind::NewLine, line));
        }

        if c.is_ascii_digit() {
            return self.read_number(line);
        }
        if c == '"' {
            return self.read_string(line);
        }
        if c.is_alphabetic() || c == '_' {
            return self.read_ident(line);
        }

        self.bump();
        let kind = match c {
            '(' => {
                if let Some(top) = self.interp_parens.last_mut() {
                    *top += 1;
                }
                TokenKind::LParen
            }
            ')' => {
                if let Some(&top) = self.interp_parens.last() {
                    if top == 0 {
                        self.interp_parens.pop();
                        return self.resume_string(line);
                    }
                    *self.interp_parens.last_mut().unwrap() -= 1;
                }
                TokenKind::RParen
            }
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            '.' => {
                if self.advance_if('.') {
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            '?' => {
                if self.advance_if('?') {
                    TokenKind::QuestionQuestion
                } else {
                    TokenKind::Question
                }
            }
            '+' => {
                if self.advance_if('=') {
                    TokenKind::PlusEqual
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                if self.advance_if('=') {
                    TokenKind::MinusEqual
                } else {
                    TokenKind::Minus
                }
            }
            '*' => {
                if self.advance_if('*') {
                    TokenKind::StarStar
                } else if self.advance_if('=') {
                    TokenKind::StarEqual
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                if self.advance_if('/') {
                    TokenKind::SlashSlash
                } else if self.advance_if('=') {
                    TokenKind::SlashEqual
                } else {
                    TokenKind::Slash
                }
            }
            '%' => {
                if self.advance_if('=') {
                    TokenKind::PercentEqual
                } else {
                    TokenKind::Percent
                }
            }
            '&' => TokenKind::BAnd,
            '|' => TokenKind::BOr,
            '^' => TokenKind::BXor,
            '~' => TokenKind::BNot,
            '!' => {
                if self.advance_if('=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                }
            }
            '=' => {
                if self.advance_if('=') {
                    TokenKind::EqualEqual
                } else if self.advance_if('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Equal
                }
            }
            '<' => {
                if self.advance_if('=') {
                    TokenKind::LessEqual
                } else if self.advance_if('<') {
                    TokenKind::LShift
                } else {
                    TokenKind::Less
                }
            }
            '>' => {
                if self.advance_if('=') {
                    TokenKind::GreaterEqual
                } else if self.advance_if('>') {
                    TokenKind::RShift
                } else {
                    TokenKind::Greater
                }
            }
            other => TokenKind::Error(format!("caractère inattendu: {other:?}")),
        };
        Ok(Token::new(kind, line))
    }

    fn read_number(&mut self, line: u32) -> Result<Token, CompileError> {
        let start_rest = self.rest();
        let mut len = 0usize;
        while matches!(self.peek_at(start_rest, len), Some(c) if c.is_ascii_digit()) {
            len += 1;
        }
        if self.peek_at(start_rest, len) == Some('.')
            && matches!(self.peek_at(start_rest, len + 1), Some(c) if c.is_ascii_digit())
        {
            len += 1;
            while matches!(self.peek_at(start_rest, len), Some(c) if c.is_ascii_digit()) {
                len += 1;
            }
        }
        if matches!(self.peek_at(start_rest, len), Some('e') | Some('E')) {
            let mut probe = len + 1;
            if matches!(self.peek_at(start_rest, probe), Some('+') | Some('-')) {
                probe += 1;
            }
            if matches!(self.peek_at(start_rest, probe), Some(c) if c.is_ascii_digit()) {
                len = probe;
                while matches!(self.peek_at(start_rest, len), Some(c) if c.is_ascii_digit()) {
                    len += 1;
                }
            }
        }
        let text = &start_rest[..byte_len(start_rest, len)];
        for _ in 0..len {
            self.bump();
        }
        let value: f64 =
            text.parse().map_err(|_| self.err(format!("nombre invalide: {text}")))?;
        Ok(Token::new(TokenKind::Number(value), line))
    }

    fn read_ident(&mut self, line: u32) -> Result<Token, CompileError> {
        let rest = self.rest();
        let mut len = 0usize;
        while matches!(self.peek_at(rest, len), Some(c) if c.is_alphanumeric() || c == '_') {
            len += 1;
        }
        let text = &rest[..byte_len(rest, len)];
        let text_owned = text.to_string();
        for _ in 0..len {
            self.bump();
        }
        let kind = match text_owned.as_str() {
            "var" => TokenKind::Var,
            "const" => TokenKind::Const,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "continue" => TokenKind::Continue,
            "break" => TokenKind::Break,
            "function" => TokenKind::Function,
            "return" => TokenKind::Return,
            "class" => TokenKind::Class,
            "static" => TokenKind::Static,
            "get" => TokenKind::Get,
            "set" => TokenKind::Set,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "this" => TokenKind::This,
            "super" => TokenKind::Super,
            "new" => TokenKind::New,
            "is" => TokenKind::Is,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            _ => TokenKind::Ident(text_owned),
        };
        Ok(Token::new(kind, line))
    }

    /// Lit un segment de chaîne jusqu'à `"`, `\(` ou une séquence d'échappement.
    fn read_string(&mut self, line: u32) -> Result<Token, CompileError> {
        self.bump(); // consomme `"`
        self.read_string_segment(line)
    }

    fn resume_string(&mut self, line: u32) -> Result<Token, CompileError> {
        self.read_string_segment(line)
    }

    fn read_string_segment(&mut self, line: u32) -> Result<Token, CompileError> {
        let mut buf = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err("chaîne non terminée")),
                Some('"') => return Ok(Token::new(TokenKind::Str(buf), line)),
                Some('\\') => match self.bump() {
                    Some('n') => buf.push('\n'),
                    Some('t') => buf.push('\t'),
                    Some('r') => buf.push('\r'),
                    Some('\\') => buf.push('\\'),
                    Some('"') => buf.push('"'),
                    Some('0') => buf.push('\0'),
                    Some('(') => {
                        if self.interp_parens.len() >= MAX_INTERPOLATION_NESTING {
                            return Err(self.err("interpolation imbriquée trop profondément"));
                        }
                        self.interp_parens.push(0);
                        return Ok(Token::new(TokenKind::StrPart(buf), line));
                    }
                    Some(other) => return Err(self.err(format!("séquence d'échappement inconnue: \\{other}"))),
                    None => return Err(self.err("chaîne non terminée")),
                },
                Some(c) => buf.push(c),
            }
        }
    }
}

fn byte_len(s: &str, char_count: usize) -> usize {
    s.char_indices().nth(char_count).map(|(i, _)| i).unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Scanner::new("<test>", src).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn scans_basic_tokens() {
        let k = kinds("var x = 1 + 2;");
        assert_eq!(
            k,
            vec![
                TokenKind::Var,
                TokenKind::Ident("x".into()),
                TokenKind::Equal,
                TokenKind::Number(1.0),
                TokenKind::Plus,
                TokenKind::Number(2.0),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn scans_compound_operators() {
        let k = kinds("a ?? b => a <= b");
        assert!(k.contains(&TokenKind::QuestionQuestion));
        assert!(k.contains(&TokenKind::Arrow));
        assert!(k.contains(&TokenKind::LessEqual));
    }

    #[test]
    fn scans_string_interpolation() {
        let k = kinds(r#""x = \(1 + 2)!""#);
        assert_eq!(
            k,
            vec![
                TokenKind::StrPart("x = ".into()),
                TokenKind::Number(1.0),
                TokenKind::Plus,
                TokenKind::Number(2.0),
                TokenKind::Str("!".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn newline_is_significant() {
        let k = kinds("a\nb");
        assert_eq!(
            k,
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::NewLine,
                TokenKind::Ident("b".into()),
                TokenKind::Eof
            ]
        );
    }
}
