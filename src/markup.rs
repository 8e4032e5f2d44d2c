use crate::ast::{AttrValue, Attribute, Node, NodeType, Span};
use crate::error::ParseError;
use crate::lexer::{Lexer, Token, TokenType};
use crate::tags;
use miette::NamedSource;

/// Scans a document body into a markup tree of tags, annotations, text and fences.
///
/// All positions are absolute offsets into `source`; `body_start` is where the body
/// begins (after any frontmatter).
pub struct MarkupParser<'a> {
    source: &'a str,
    name: &'a str,
    position: usize,
    stack: Vec<(String, Node)>,
}

enum TagToken {
    Open {
        name: String,
        attributes: Vec<Attribute>,
        self_closing: bool,
    },
    Close(String),
    Annotation(String),
}

impl<'a> MarkupParser<'a> {
    pub fn new(source: &'a str, name: &'a str, body_start: usize) -> Self {
        Self {
            source,
            name,
            position: body_start,
            stack: Vec::new(),
        }
    }

    pub fn parse(mut self) -> Result<Node, ParseError> {
        let mut root = Node::leaf(NodeType::Document, self.position, self.source.len());
        root.open_end = self.position;
        self.stack.push((String::new(), root));

        let mut text_start = self.position;
        let mut at_line_start = true;

        while self.position < self.source.len() {
            let rest = &self.source[self.position..];

            if at_line_start {
                if let Some((fence, end)) = self.scan_fence(self.position) {
                    self.flush_text(text_start, self.position);
                    self.push_child(fence);
                    self.position = end;
                    text_start = end;
                    at_line_start = false;
                    continue;
                }
            }

            if rest.starts_with("{%") {
                self.flush_text(text_start, self.position);
                let tag_start = self.position;
                let tag_end = self.find_tag_end(tag_start)?;
                self.handle_tag(tag_start, tag_end)?;
                self.position = tag_end;
                text_start = tag_end;
                at_line_start = false;
                continue;
            }

            let Some(ch) = rest.chars().next() else {
                break;
            };
            at_line_start = ch == '\n';
            self.position += ch.len_utf8();
        }
        self.flush_text(text_start, self.position);

        let Some((name, node)) = self.stack.pop() else {
            return Ok(Node::leaf(NodeType::Document, 0, self.source.len()));
        };
        if !self.stack.is_empty() {
            return Err(ParseError::UnclosedTag {
                src: self.named_source(),
                span: (node.pos_start, node.open_end - node.pos_start).into(),
                name,
            });
        }
        log::debug!("markup tree built with {} top-level nodes", node.children.len());
        Ok(node)
    }

    fn named_source(&self) -> NamedSource<String> {
        NamedSource::new(self.name, self.source.to_string())
    }

    fn push_child(&mut self, node: Node) {
        if let Some((_, parent)) = self.stack.last_mut() {
            parent.children.push(node);
        }
    }

    fn flush_text(&mut self, start: usize, end: usize) {
        if end > start {
            let text = self.source[start..end].to_string();
            self.push_child(Node::leaf(NodeType::Text(text), start, end));
        }
    }

    /// Recognises a fenced code block opening at `line_start`. Returns the fence node and
    /// the byte position just past its closing line (or the end of the document).
    fn scan_fence(&self, line_start: usize) -> Option<(Node, usize)> {
        let line_end = line_end(self.source, line_start);
        let line = &self.source[line_start..line_end];
        let indent = line.len() - line.trim_start_matches(' ').len();
        if indent > 3 {
            return None;
        }
        let after_indent = &line[indent..];
        let ticks = after_indent.chars().take_while(|c| *c == '`').count();
        if ticks < 3 {
            return None;
        }
        let info = after_indent[ticks..].trim();
        if info.contains('`') {
            return None;
        }

        let content_start = (line_end + 1).min(self.source.len());
        let mut cursor = content_start;
        while cursor < self.source.len() {
            let end = self::line_end(self.source, cursor);
            let candidate = self.source[cursor..end].trim();
            if candidate.len() >= ticks && candidate.chars().all(|c| c == '`') {
                let content = self.source[content_start..cursor].to_string();
                let node = Node::leaf(
                    NodeType::Fence {
                        info: info.to_string(),
                        content,
                    },
                    line_start,
                    end,
                );
                return Some((node, end));
            }
            cursor = end + 1;
        }

        // An unclosed fence runs to the end of the document.
        let content = self.source[content_start.min(self.source.len())..].to_string();
        let node = Node::leaf(
            NodeType::Fence {
                info: info.to_string(),
                content,
            },
            line_start,
            self.source.len(),
        );
        Some((node, self.source.len()))
    }

    /// Finds the byte position just past the `%}` closing the tag opened at `start`,
    /// skipping over quoted attribute strings.
    fn find_tag_end(&self, start: usize) -> Result<usize, ParseError> {
        let bytes = self.source.as_bytes();
        let mut i = start + 2;
        let mut in_string = false;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' if in_string => i += 1,
                b'"' => in_string = !in_string,
                b'%' if !in_string && bytes.get(i + 1) == Some(&b'}') => return Ok(i + 2),
                _ => {}
            }
            i += 1;
        }
        Err(ParseError::UnterminatedTag {
            src: self.named_source(),
            span: (start, 2).into(),
        })
    }

    fn handle_tag(&mut self, start: usize, end: usize) -> Result<(), ParseError> {
        let interior = &self.source[start + 2..end - 2];
        let tokens: Vec<Token> = Lexer::with_offset(interior, start + 2)
            .lex()
            .into_iter()
            .filter(|t| !matches!(t.ttype, TokenType::Whitespace))
            .collect();

        let tag = TagReader::new(self, tokens).read()?;
        match tag {
            TagToken::Open {
                name,
                attributes,
                self_closing,
            } => {
                let node = Node {
                    node_type: NodeType::Tag(name.clone()),
                    attributes,
                    children: Vec::new(),
                    pos_start: start,
                    pos_end: end,
                    open_end: end,
                };
                if self_closing {
                    self.push_child(node);
                } else {
                    self.stack.push((name, node));
                }
            }
            TagToken::Close(name) => {
                let open = if self.stack.len() > 1 {
                    self.stack.pop()
                } else {
                    None
                };
                let Some((open_name, mut node)) = open else {
                    return Err(ParseError::MisplacedTag {
                        src: self.named_source(),
                        span: (start, end - start).into(),
                        name: format!("/{name}"),
                        reason: "no tag is open".to_string(),
                    });
                };
                if open_name != name {
                    return Err(ParseError::MismatchedClosingTag {
                        src: self.named_source(),
                        span: (start, end - start).into(),
                        expected: open_name,
                        found: name,
                    });
                }
                node.pos_end = end;
                self.push_child(node);
            }
            TagToken::Annotation(id) => {
                self.push_child(Node::leaf(NodeType::Annotation(id), start, end));
            }
        }
        Ok(())
    }
}

/// Recursive descent over the tokens of a single tag interior.
///
///    Tag        ::= OpenTag | CloseTag | Annotation
///    OpenTag    ::= Identifier { Attribute } [ "/" ]
///    CloseTag   ::= "/" Identifier
///    Annotation ::= "#" ( Identifier | Number )
///    Attribute  ::= Identifier "=" Value
///    Value      ::= String | Number | "true" | "false" | "null" | "[" [ Value { "," Value } ] "]"
struct TagReader<'p, 'a> {
    markup: &'p MarkupParser<'a>,
    tokens: Vec<Token>,
    position: usize,
}

impl<'p, 'a> TagReader<'p, 'a> {
    fn new(markup: &'p MarkupParser<'a>, tokens: Vec<Token>) -> Self {
        Self {
            markup,
            tokens,
            position: 0,
        }
    }

    fn read(&mut self) -> Result<TagToken, ParseError> {
        let token = self.current().clone();
        match token.ttype {
            TokenType::Slash => {
                self.advance();
                let name = self.expect_identifier("a tag name after '/'")?;
                self.expect_eof()?;
                Ok(TagToken::Close(name))
            }
            TokenType::Hash => {
                self.advance();
                let current = self.current();
                let id = match &current.ttype {
                    TokenType::Identifier(id) => id.clone(),
                    // Digit-only ids keep their spelling: `01` and `1` are different options.
                    TokenType::Number(_) => match self
                        .markup
                        .source
                        .get(current.pos_start..current.pos_end)
                        .filter(|raw| tags::is_valid_id(raw))
                    {
                        Some(raw) => raw.to_string(),
                        None => return self.err_unexpected("an option id after '#'"),
                    },
                    _ => return self.err_unexpected("an option id after '#'"),
                };
                self.advance();
                self.expect_eof()?;
                Ok(TagToken::Annotation(id))
            }
            TokenType::Identifier(name) => {
                self.advance();
                let mut attributes = Vec::new();
                let mut self_closing = false;
                loop {
                    match self.current().ttype.clone() {
                        TokenType::Eof => break,
                        TokenType::Slash => {
                            self.advance();
                            self_closing = true;
                            self.expect_eof()?;
                            break;
                        }
                        TokenType::Identifier(_) => attributes.push(self.read_attribute()?),
                        _ => return self.err_unexpected("an attribute name"),
                    }
                }
                Ok(TagToken::Open {
                    name,
                    attributes,
                    self_closing,
                })
            }
            _ => self.err_unexpected("a tag name"),
        }
    }

    fn read_attribute(&mut self) -> Result<Attribute, ParseError> {
        let start = self.current().pos_start;
        let name = self.expect_identifier("an attribute name")?;
        if self.current().ttype != TokenType::Equals {
            return self.err_unexpected("'=' after attribute name");
        }
        self.advance();
        let value = self.read_value()?;
        let end = self.previous_end();
        Ok(Attribute {
            name,
            value,
            span: Span::new(start, end),
        })
    }

    fn read_value(&mut self) -> Result<AttrValue, ParseError> {
        let value = match self.current().ttype.clone() {
            TokenType::String(s) => AttrValue::String(s),
            TokenType::Number(n) => AttrValue::Number(n),
            TokenType::True => AttrValue::Bool(true),
            TokenType::False => AttrValue::Bool(false),
            TokenType::Null => AttrValue::Null,
            TokenType::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if self.current().ttype != TokenType::RBracket {
                    loop {
                        items.push(self.read_value()?);
                        if self.current().ttype != TokenType::Comma {
                            break;
                        }
                        self.advance();
                        if self.current().ttype == TokenType::RBracket {
                            break; // Allow trailing comma
                        }
                    }
                }
                if self.current().ttype != TokenType::RBracket {
                    return self.err_unexpected("',' or ']' in list");
                }
                AttrValue::List(items)
            }
            _ => return self.err_unexpected("an attribute value"),
        };
        self.advance();
        Ok(value)
    }

    fn current(&self) -> &Token {
        // The lexer always terminates the stream with Eof, so the last token is safe.
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.position.min(last)]
    }

    fn previous_end(&self) -> usize {
        self.tokens
            .get(self.position.saturating_sub(1))
            .map_or(0, |t| t.pos_end)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn expect_identifier(&mut self, expected: &str) -> Result<String, ParseError> {
        match self.current().ttype.clone() {
            TokenType::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => self.err_unexpected(expected),
        }
    }

    fn expect_eof(&self) -> Result<(), ParseError> {
        if self.current().ttype == TokenType::Eof {
            Ok(())
        } else {
            self.err_unexpected("the end of the tag")
        }
    }

    fn err_unexpected<T>(&self, expected: &str) -> Result<T, ParseError> {
        let token = self.current();
        Err(ParseError::UnexpectedToken {
            src: self.markup.named_source(),
            span: (token.pos_start, token.pos_end - token.pos_start).into(),
            expected: expected.to_string(),
        })
    }
}

fn line_end(source: &str, from: usize) -> usize {
    source[from..].find('\n').map_or(source.len(), |i| from + i)
}
