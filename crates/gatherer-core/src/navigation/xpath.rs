//! XPath subset, translated to CSS selectors.
//!
//! Supported: `/` and `//` steps, the `child::`, `descendant::`,
//! `descendant-or-self::node()`, `following-sibling::` and `self::node()`
//! axes, name tests and `*`, and predicates `[@a]`, `[@a='v']`, `[@a!='v']`,
//! `[contains(@a,'v')]`, `[starts-with(@a,'v')]`, `[not(...)]`, `[n]`,
//! `[last()]` joined with `and`. A final `@attr` or `text()` step selects
//! attribute values or direct text instead of elements.

/// What a translated expression yields for each matched element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Element text content.
    Elements,
    /// Direct text children.
    Text,
    Attribute(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssQuery {
    pub css: String,
    pub target: Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    Sibling,
}

pub fn translate(xpath: &str) -> Result<CssQuery, String> {
    let mut p = Cursor::new(xpath.trim());
    let mut css = String::new();
    let mut target = Target::Elements;

    let (mut next_axis, mut from_root) = if p.eat("//") {
        (Axis::Descendant, false)
    } else if p.eat("/") {
        (Axis::Child, true)
    } else {
        (Axis::Descendant, false)
    };

    loop {
        let mut axis = next_axis;
        if p.starts_with("..") || p.starts_with("parent::") || p.starts_with("ancestor") {
            return Err("parent and ancestor axes are not supported".into());
        }
        if p.eat("descendant-or-self::node()") {
            if !(p.eat("//") || p.eat("/")) {
                return Err("descendant-or-self::node() must be followed by a step".into());
            }
            next_axis = Axis::Descendant;
            from_root = false;
            continue;
        }
        if p.eat("self::node()") || p.eat(".") {
            if p.at_end() {
                break;
            }
            next_axis = if p.eat("//") {
                Axis::Descendant
            } else if p.eat("/") {
                axis
            } else {
                return Err(p.unexpected());
            };
            continue;
        }
        if p.eat("descendant::") {
            axis = Axis::Descendant;
        } else if p.eat("following-sibling::") {
            axis = Axis::Sibling;
        } else {
            p.eat("child::");
        }

        if p.eat("@") || p.eat("attribute::") {
            target = Target::Attribute(p.name()?);
            if !p.at_end() {
                return Err("attribute selection must be the last step".into());
            }
            break;
        }
        if p.eat("text()") {
            target = Target::Text;
            if !p.at_end() {
                return Err("text() must be the last step".into());
            }
            break;
        }

        let name = if p.eat("*") {
            "*".to_string()
        } else {
            p.name()?
        };
        let any_name = name == "*";

        if css.is_empty() {
            if axis == Axis::Sibling {
                return Err("following-sibling:: needs a preceding step".into());
            }
            css.push_str(&name);
            if from_root {
                css.push_str(":root");
            }
        } else {
            css.push_str(match axis {
                Axis::Child => " > ",
                Axis::Descendant => " ",
                Axis::Sibling => " ~ ",
            });
            css.push_str(&name);
        }
        from_root = false;

        while p.eat("[") {
            let body = p.until_bracket()?;
            css.push_str(&predicate(body, any_name)?);
        }

        if p.at_end() {
            break;
        }
        next_axis = if p.eat("//") {
            Axis::Descendant
        } else if p.eat("/") {
            Axis::Child
        } else {
            return Err(p.unexpected());
        };
    }

    if css.is_empty() {
        return Err(format!("'{}' does not select any elements", xpath));
    }
    Ok(CssQuery { css, target })
}

fn predicate(body: &str, any_name: bool) -> Result<String, String> {
    let body = body.trim();
    if let Ok(n) = body.parse::<u32>() {
        if n == 0 {
            return Err("positions start at 1".into());
        }
        return Ok(if any_name {
            format!(":nth-child({})", n)
        } else {
            format!(":nth-of-type({})", n)
        });
    }
    if body == "last()" {
        return Ok(if any_name { ":last-child" } else { ":last-of-type" }.to_string());
    }
    split_top_level(body, " and ")
        .into_iter()
        .map(condition)
        .collect::<Result<Vec<_>, _>>()
        .map(|parts| parts.concat())
}

fn condition(cond: &str) -> Result<String, String> {
    let cond = cond.trim();
    if let Some(inner) = call_args(cond, "not") {
        return Ok(format!(":not({})", condition(inner)?));
    }
    for (func, op) in [("contains", "*="), ("starts-with", "^=")] {
        if let Some(args) = call_args(cond, func) {
            let parts = split_top_level(args, ",");
            if parts.len() != 2 {
                return Err(format!("{}() takes two arguments", func));
            }
            let attr = attribute_ref(parts[0])?;
            let value = literal(parts[1])?;
            return Ok(format!("[{}{}\"{}\"]", attr, op, css_escape(&value)));
        }
    }
    if let Some((lhs, rhs)) = split_once_top_level(cond, "!=") {
        let attr = attribute_ref(lhs)?;
        return Ok(format!(":not([{}=\"{}\"])", attr, css_escape(&literal(rhs)?)));
    }
    if let Some((lhs, rhs)) = split_once_top_level(cond, "=") {
        let attr = attribute_ref(lhs)?;
        return Ok(format!("[{}=\"{}\"]", attr, css_escape(&literal(rhs)?)));
    }
    if cond.starts_with('@') {
        return Ok(format!("[{}]", attribute_ref(cond)?));
    }
    Err(format!("unsupported predicate [{}]", cond))
}

/// `name(args)` -> `args`.
fn call_args<'a>(expr: &'a str, name: &str) -> Option<&'a str> {
    let rest = expr.strip_prefix(name)?.trim_start();
    rest.strip_prefix('(')?.strip_suffix(')')
}

fn attribute_ref(s: &str) -> Result<String, String> {
    let s = s.trim();
    let name = s
        .strip_prefix('@')
        .or_else(|| s.strip_prefix("attribute::"))
        .ok_or_else(|| format!("expected an attribute reference, got '{}'", s))?;
    if name.is_empty() || !name.chars().all(is_name_char) {
        return Err(format!("invalid attribute name '{}'", name));
    }
    Ok(name.to_string())
}

fn literal(s: &str) -> Result<String, String> {
    let s = s.trim();
    for quote in ['\'', '"'] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
            return Ok(inner.to_string());
        }
    }
    if !s.is_empty() && s.parse::<f64>().is_ok() {
        return Ok(s.to_string());
    }
    Err(format!("expected a string literal, got '{}'", s))
}

fn css_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_' || c == ':'
}

/// Split on `sep` outside quotes and parentheses.
fn split_top_level<'a>(s: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut rest = s;
    while let Some((head, tail)) = split_once_top_level(rest, sep) {
        parts.push(head);
        rest = tail;
    }
    parts.push(rest);
    parts
}

fn split_once_top_level<'a>(s: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' => depth += 1,
                ')' | ']' => depth -= 1,
                _ if depth == 0 && s[i..].starts_with(sep) => {
                    return Some((&s[..i], &s[i + sep.len()..]));
                }
                _ => {}
            },
        }
    }
    None
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn name(&mut self) -> Result<String, String> {
        let len: usize = self
            .rest()
            .chars()
            .take_while(|c| is_name_char(*c))
            .map(char::len_utf8)
            .sum();
        if len == 0 {
            return Err(self.unexpected());
        }
        let name = &self.rest()[..len];
        self.pos += len;
        Ok(name.to_string())
    }

    /// Consume up to the `]` matching an already-eaten `[`.
    fn until_bracket(&mut self) -> Result<&'a str, String> {
        let rest = self.rest();
        let mut depth = 0i32;
        let mut quote: Option<char> = None;
        for (i, c) in rest.char_indices() {
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None => match c {
                    '\'' | '"' => quote = Some(c),
                    '[' => depth += 1,
                    ']' if depth == 0 => {
                        self.pos += i + 1;
                        return Ok(&rest[..i]);
                    }
                    ']' => depth -= 1,
                    _ => {}
                },
            }
        }
        Err("unterminated predicate".into())
    }

    fn unexpected(&self) -> String {
        match self.rest().chars().next() {
            Some(c) => format!("unexpected '{}' at offset {} in '{}'", c, self.pos, self.src),
            None => format!("unexpected end of '{}'", self.src),
        }
    }
}
