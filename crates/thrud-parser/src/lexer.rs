//! Line tokenizer.

use crate::ParseError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Token {
    /// Bare word: keywords, mnemonics, types, block labels.
    Word(String),
    /// `%name`
    Local(String),
    /// `@name`
    Global(String),
    Int(i64),
    Punct(char),
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Word(w) => format!("'{w}'"),
            Self::Local(n) => format!("'%{n}'"),
            Self::Global(n) => format!("'@{n}'"),
            Self::Int(v) => format!("'{v}'"),
            Self::Punct(c) => format!("'{c}'"),
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$')
}

/// Splits one source line into tokens. `;` starts a comment.
pub(crate) fn tokenize(line: &str, line_no: usize) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();

    let take_name = |start: usize, chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>| {
        let mut end = start;
        while let Some(&(i, c)) = chars.peek() {
            if !is_name_char(c) {
                break;
            }
            end = i + c.len_utf8();
            chars.next();
        }
        line[start..end].to_string()
    };

    while let Some(&(i, c)) = chars.peek() {
        match c {
            ';' => break,
            c if c.is_whitespace() => {
                chars.next();
            }
            '%' | '@' => {
                chars.next();
                let name = take_name(i + 1, &mut chars);
                if name.is_empty() {
                    return Err(ParseError::InvalidChar { line: line_no, ch: c });
                }
                tokens.push(if c == '%' {
                    Token::Local(name)
                } else {
                    Token::Global(name)
                });
            }
            '-' | '0'..='9' => {
                chars.next();
                let mut end = i + 1;
                while let Some(&(j, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    end = j + 1;
                    chars.next();
                }
                let text = &line[i..end];
                let value = text.parse::<i64>().map_err(|_| ParseError::BadInteger {
                    line: line_no,
                    text: text.to_string(),
                })?;
                tokens.push(Token::Int(value));
            }
            '=' | ',' | '(' | ')' | '[' | ']' | '{' | '}' | ':' => {
                chars.next();
                tokens.push(Token::Punct(c));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let word = take_name(i, &mut chars);
                tokens.push(Token::Word(word));
            }
            other => return Err(ParseError::InvalidChar { line: line_no, ch: other }),
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_instruction() {
        let tokens = tokenize("  %p.1 = gep ptr global @tile, -4 ; offset", 3).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Local("p.1".into()),
                Token::Punct('='),
                Token::Word("gep".into()),
                Token::Word("ptr".into()),
                Token::Word("global".into()),
                Token::Global("tile".into()),
                Token::Punct(','),
                Token::Int(-4),
            ]
        );
    }

    #[test]
    fn reject_stray_characters() {
        assert!(matches!(
            tokenize("%a = add i32 %b # %c", 7),
            Err(ParseError::InvalidChar { line: 7, ch: '#' })
        ));
        assert!(matches!(
            tokenize("%", 1),
            Err(ParseError::InvalidChar { line: 1, ch: '%' })
        ));
        assert!(matches!(
            tokenize("-", 2),
            Err(ParseError::BadInteger { line: 2, .. })
        ));
    }
}
