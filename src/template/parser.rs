//! Parser for the handlebars-style template language.
//!
//! Supported syntax:
//! - `{{path.to.value}}`: HTML-escaped output
//! - `{{{path}}}`: raw output
//! - `{{helper arg1 "literal" (subhelper x)}}`: helper call
//! - `{{#if expr}}…{{else}}…{{/if}}`, `{{#unless expr}}…{{/unless}}`
//! - `{{#each list}}…{{else}}…{{/each}}` with `this`, `@index` and `@key`
//! - `{{! comment }}`

use serde_json::Value;

use super::types::{TemplateError, TemplateResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Path {
    This,
    Index,
    Key,
    /// Dotted lookup. Without a `this.` prefix the lookup walks outward
    /// through enclosing `each` scopes up to the root data.
    Field {
        from_this: bool,
        segments: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Path),
    Helper { name: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    If,
    Unless,
    Each,
}

impl BlockKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "if" => Some(BlockKind::If),
            "unless" => Some(BlockKind::Unless),
            "each" => Some(BlockKind::Each),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            BlockKind::If => "if",
            BlockKind::Unless => "unless",
            BlockKind::Each => "each",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Output {
        expr: Expr,
        escape: bool,
    },
    Conditional {
        expr: Expr,
        negate: bool,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Each {
        expr: Expr,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

enum Tag {
    Text(String),
    Output(String, bool),
    Open(BlockKind, String),
    Else,
    Close(String),
}

enum BlockEnd {
    Eof,
    Else,
    Close,
}

/// Parse template source into a node tree.
pub fn parse(source: &str) -> TemplateResult<Vec<Node>> {
    let tags = tokenize(source)?;
    let mut iter = tags.into_iter();
    let (nodes, _) = parse_nodes(&mut iter, None)?;
    Ok(nodes)
}

fn tokenize(source: &str) -> TemplateResult<Vec<Tag>> {
    let mut tags = Vec::new();
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            tags.push(Tag::Text(rest[..start].to_string()));
        }
        let after = &rest[start..];

        if let Some(inner) = after.strip_prefix("{{{") {
            let end = inner
                .find("}}}")
                .ok_or_else(|| TemplateError::Parse("unclosed '{{{'".to_string()))?;
            tags.push(Tag::Output(inner[..end].trim().to_string(), false));
            rest = &inner[end + 3..];
            continue;
        }

        let inner = &after[2..];
        let end = inner
            .find("}}")
            .ok_or_else(|| TemplateError::Parse("unclosed '{{'".to_string()))?;
        let body = inner[..end].trim();
        rest = &inner[end + 2..];

        if body.starts_with('!') {
            continue;
        }

        if let Some(open) = body.strip_prefix('#') {
            let (name, expr) = match open.split_once(char::is_whitespace) {
                Some((name, expr)) => (name, expr.trim()),
                None => (open, ""),
            };
            let kind = BlockKind::from_name(name)
                .ok_or_else(|| TemplateError::Parse(format!("unknown block helper '{}'", name)))?;
            if expr.is_empty() {
                return Err(TemplateError::Parse(format!("'#{}' needs an argument", name)));
            }
            tags.push(Tag::Open(kind, expr.to_string()));
        } else if let Some(close) = body.strip_prefix('/') {
            tags.push(Tag::Close(close.trim().to_string()));
        } else if body == "else" {
            tags.push(Tag::Else);
        } else if body.is_empty() {
            return Err(TemplateError::Parse("empty expression".to_string()));
        } else {
            tags.push(Tag::Output(body.to_string(), true));
        }
    }

    if !rest.is_empty() {
        tags.push(Tag::Text(rest.to_string()));
    }

    Ok(tags)
}

fn parse_nodes(
    iter: &mut impl Iterator<Item = Tag>,
    open: Option<BlockKind>,
) -> TemplateResult<(Vec<Node>, BlockEnd)> {
    let mut nodes = Vec::new();

    while let Some(tag) = iter.next() {
        match tag {
            Tag::Text(text) => nodes.push(Node::Text(text)),
            Tag::Output(source, escape) => nodes.push(Node::Output {
                expr: parse_expr(&source)?,
                escape,
            }),
            Tag::Open(kind, source) => {
                let expr = parse_expr(&source)?;
                let (body, end) = parse_nodes(iter, Some(kind))?;
                let otherwise = match end {
                    BlockEnd::Else => match parse_nodes(iter, Some(kind))? {
                        (nodes, BlockEnd::Close) => nodes,
                        _ => return Err(TemplateError::Parse(format!(
                            "more than one {{{{else}}}} in '#{}'",
                            kind.as_str()
                        ))),
                    },
                    _ => Vec::new(),
                };

                nodes.push(match kind {
                    BlockKind::If | BlockKind::Unless => Node::Conditional {
                        expr,
                        negate: kind == BlockKind::Unless,
                        then: body,
                        otherwise,
                    },
                    BlockKind::Each => Node::Each {
                        expr,
                        body,
                        otherwise,
                    },
                });
            }
            Tag::Else => {
                return match open {
                    Some(_) => Ok((nodes, BlockEnd::Else)),
                    None => Err(TemplateError::Parse("{{else}} outside a block".to_string())),
                };
            }
            Tag::Close(name) => {
                return match open {
                    Some(kind) if kind.as_str() == name => Ok((nodes, BlockEnd::Close)),
                    Some(kind) => Err(TemplateError::MismatchedBlock {
                        expected: kind.as_str().to_string(),
                        found: name,
                    }),
                    None => Err(TemplateError::Parse(format!("unexpected {{{{/{}}}}}", name))),
                };
            }
        }
    }

    match open {
        Some(kind) => Err(TemplateError::UnclosedBlock(kind.as_str().to_string())),
        None => Ok((nodes, BlockEnd::Eof)),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Str(String),
    Word(String),
}

enum Item {
    Word(String),
    Expr(Expr),
}

fn lex_expr(source: &str) -> TemplateResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' | '\'' => {
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == c => break,
                        Some(ch) => literal.push(ch),
                        None => {
                            return Err(TemplateError::Parse(format!(
                                "unterminated string in '{}'",
                                source
                            )))
                        }
                    }
                }
                tokens.push(Token::Str(literal));
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || ch == '(' || ch == ')' {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    Ok(tokens)
}

/// Parse the inside of a mustache: a single value or a helper call.
pub fn parse_expr(source: &str) -> TemplateResult<Expr> {
    let tokens = lex_expr(source)?;
    let mut pos = 0;
    let items = parse_items(&tokens, &mut pos, false)?;
    build_expr(items, false)
}

fn parse_items(tokens: &[Token], pos: &mut usize, nested: bool) -> TemplateResult<Vec<Item>> {
    let mut items = Vec::new();

    while *pos < tokens.len() {
        match &tokens[*pos] {
            Token::Open => {
                *pos += 1;
                let inner = parse_items(tokens, pos, true)?;
                items.push(Item::Expr(build_expr(inner, true)?));
            }
            Token::Close => {
                if !nested {
                    return Err(TemplateError::Parse("unbalanced ')'".to_string()));
                }
                *pos += 1;
                return Ok(items);
            }
            Token::Str(s) => {
                items.push(Item::Expr(Expr::Literal(Value::String(s.clone()))));
                *pos += 1;
            }
            Token::Word(w) => {
                items.push(Item::Word(w.clone()));
                *pos += 1;
            }
        }
    }

    if nested {
        Err(TemplateError::Parse("unclosed '('".to_string()))
    } else {
        Ok(items)
    }
}

fn build_expr(items: Vec<Item>, subexpression: bool) -> TemplateResult<Expr> {
    let mut items = items.into_iter();
    let first = items
        .next()
        .ok_or_else(|| TemplateError::Parse("empty expression".to_string()))?;
    let args: Vec<Expr> = items.map(item_to_expr).collect();

    if args.is_empty() && !subexpression {
        return Ok(item_to_expr(first));
    }

    match first {
        Item::Word(name) => Ok(Expr::Helper { name, args }),
        Item::Expr(_) => Err(TemplateError::Parse(
            "helper name must be an identifier".to_string(),
        )),
    }
}

fn item_to_expr(item: Item) -> Expr {
    match item {
        Item::Word(word) => atom(&word),
        Item::Expr(expr) => expr,
    }
}

fn atom(word: &str) -> Expr {
    match word {
        "true" => return Expr::Literal(Value::Bool(true)),
        "false" => return Expr::Literal(Value::Bool(false)),
        "null" | "undefined" => return Expr::Literal(Value::Null),
        "this" | "." => return Expr::Path(Path::This),
        "@index" => return Expr::Path(Path::Index),
        "@key" => return Expr::Path(Path::Key),
        _ => {}
    }

    if let Ok(n) = word.parse::<i64>() {
        return Expr::Literal(Value::from(n));
    }
    if let Some(n) = word.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        return Expr::Literal(Value::Number(n));
    }

    let (from_this, rest) = match word.strip_prefix("this.") {
        Some(rest) => (true, rest),
        None => (false, word),
    };

    Expr::Path(Path::Field {
        from_this,
        segments: rest.split('.').map(str::to_string).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(path: &str) -> Expr {
        Expr::Path(Path::Field {
            from_this: false,
            segments: path.split('.').map(str::to_string).collect(),
        })
    }

    #[test]
    fn test_text_and_variables() {
        let nodes = parse("Hello {{user.name}}, {{{raw}}}!").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Text("Hello ".into()),
                Node::Output {
                    expr: field("user.name"),
                    escape: true
                },
                Node::Text(", ".into()),
                Node::Output {
                    expr: field("raw"),
                    escape: false
                },
                Node::Text("!".into()),
            ]
        );
    }

    #[test]
    fn test_helper_with_subexpression() {
        let expr = parse_expr(r#"and (eq status "shipped") (gt total 10)"#).unwrap();
        assert_eq!(
            expr,
            Expr::Helper {
                name: "and".into(),
                args: vec![
                    Expr::Helper {
                        name: "eq".into(),
                        args: vec![field("status"), Expr::Literal(Value::String("shipped".into()))],
                    },
                    Expr::Helper {
                        name: "gt".into(),
                        args: vec![field("total"), Expr::Literal(Value::from(10))],
                    },
                ],
            }
        );
    }

    #[test]
    fn test_if_else_block() {
        let nodes = parse("{{#if a}}yes{{else}}no{{/if}}").unwrap();
        assert_eq!(
            nodes,
            vec![Node::Conditional {
                expr: field("a"),
                negate: false,
                then: vec![Node::Text("yes".into())],
                otherwise: vec![Node::Text("no".into())],
            }]
        );
    }

    #[test]
    fn test_nested_each_and_unless() {
        let nodes = parse("{{#each items}}{{#unless hidden}}{{this.name}}{{/unless}}{{/each}}").unwrap();
        match &nodes[0] {
            Node::Each { body, .. } => assert!(matches!(body[0], Node::Conditional { negate: true, .. })),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_comments_are_dropped() {
        assert_eq!(parse("a{{! note }}b").unwrap().len(), 2);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse("{{#if a}}open"), Err(TemplateError::UnclosedBlock(_))));
        assert!(matches!(
            parse("{{#if a}}x{{/each}}"),
            Err(TemplateError::MismatchedBlock { .. })
        ));
        assert!(parse("{{/if}}").is_err());
        assert!(parse("{{name").is_err());
        assert!(parse("{{#with a}}{{/with}}").is_err());
        assert!(parse("{{eq (a b}}").is_err());
    }
}
