//! Symbolic expressions returned by the kernel.
//!
//! Only the structure needed by the transcript is modelled: atoms, normal
//! expressions with a head and arguments, and a textual form used when a
//! result is rendered as text.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Expr {
    Symbol(String),
    Integer(i64),
    Real(f64),
    String(String),
    Normal { head: Box<Expr>, args: Vec<Expr> },
}

impl Expr {
    pub fn symbol(name: impl Into<String>) -> Self {
        Expr::Symbol(name.into())
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::String(value.into())
    }

    /// `head[args...]` with a symbol head.
    pub fn normal(head: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Normal {
            head: Box::new(Expr::Symbol(head.into())),
            args,
        }
    }

    pub fn list(items: Vec<Expr>) -> Self {
        Expr::normal("List", items)
    }

    /// The head of the expression. Atoms report their atomic type as a symbol.
    pub fn head(&self) -> Expr {
        match self {
            Expr::Symbol(_) => Expr::symbol("Symbol"),
            Expr::Integer(_) => Expr::symbol("Integer"),
            Expr::Real(_) => Expr::symbol("Real"),
            Expr::String(_) => Expr::symbol("String"),
            Expr::Normal { head, .. } => (**head).clone(),
        }
    }

    /// Textual form of the head, as used by the graphics classification table.
    pub fn head_name(&self) -> String {
        match self {
            Expr::Normal { head, .. } => head.to_string(),
            atom => atom.head().to_string(),
        }
    }

    /// 1-based argument access. Part 0 is the head.
    pub fn part(&self, index: usize) -> Option<Expr> {
        match (self, index) {
            (_, 0) => Some(self.head()),
            (Expr::Normal { args, .. }, n) => args.get(n - 1).cloned(),
            _ => None,
        }
    }

    pub fn args(&self) -> &[Expr] {
        match self {
            Expr::Normal { args, .. } => args,
            _ => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.args().len()
    }

    pub fn is_empty(&self) -> bool {
        self.args().is_empty()
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Expr::Normal { head, .. } if **head == Expr::Symbol("List".into()))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Expr::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this result is better shown as a rendered image than as text.
    ///
    /// Lists are unwrapped a single level: `{Graphics[..], ..}` is graphical,
    /// `{{Graphics[..]}}` is not.
    pub fn is_graphical(&self) -> bool {
        match classify_head(&self.head_name()) {
            HeadClass::Graphical => true,
            HeadClass::PlainText => false,
            HeadClass::Other if self.is_list() => self
                .args()
                .first()
                .map(|first| classify_head(&first.head_name()) == HeadClass::Graphical)
                .unwrap_or(false),
            HeadClass::Other => false,
        }
    }
}

/// Display classification of a head name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadClass {
    /// Explicit plain-text form; never rendered as an image.
    PlainText,
    Graphical,
    Other,
}

const HEAD_TABLE: &[(&str, HeadClass)] = &[
    ("InputForm", HeadClass::PlainText),
    ("Graphics", HeadClass::Graphical),
    ("Graphics3D", HeadClass::Graphical),
];

/// Heads ending in this suffix are display wrappers (`TableForm`, `MatrixForm`, ...).
const DISPLAY_FORM_SUFFIX: &str = "Form";

pub fn classify_head(name: &str) -> HeadClass {
    if let Some((_, class)) = HEAD_TABLE.iter().find(|(head, _)| *head == name) {
        return *class;
    }
    if name.ends_with(DISPLAY_FORM_SUFFIX) {
        HeadClass::Graphical
    } else {
        HeadClass::Other
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Symbol(name) => write!(f, "{name}"),
            Expr::Integer(n) => write!(f, "{n}"),
            Expr::Real(x) => write!(f, "{x:?}"),
            Expr::String(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        c => write!(f, "{c}")?,
                    }
                }
                f.write_str("\"")
            }
            Expr::Normal { head, args } => {
                let list = self.is_list();
                if list {
                    f.write_str("{")?;
                } else {
                    write!(f, "{head}[")?;
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(if list { "}" } else { "]" })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graphics() -> Expr {
        Expr::normal("Graphics", vec![Expr::normal("Circle", vec![])])
    }

    #[test]
    fn textual_form() {
        let e = Expr::normal(
            "Plus",
            vec![Expr::Integer(1), Expr::symbol("x"), Expr::string("a\"b")],
        );
        assert_eq!(e.to_string(), "Plus[1, x, \"a\\\"b\"]");
        assert_eq!(
            Expr::list(vec![Expr::Integer(1), Expr::Real(2.5)]).to_string(),
            "{1, 2.5}"
        );
    }

    #[test]
    fn atom_heads() {
        assert_eq!(Expr::Integer(3).head_name(), "Integer");
        assert_eq!(Expr::string("s").head_name(), "String");
        assert_eq!(Expr::symbol("x").head_name(), "Symbol");
    }

    #[test]
    fn parts_are_one_based() {
        let e = Expr::list(vec![Expr::Integer(7), Expr::Integer(8)]);
        assert_eq!(e.part(0), Some(Expr::symbol("List")));
        assert_eq!(e.part(1), Some(Expr::Integer(7)));
        assert_eq!(e.part(3), None);
        assert_eq!(e.len(), 2);
    }

    #[test]
    fn graphics_heads_are_graphical() {
        assert!(graphics().is_graphical());
        assert!(Expr::normal("Graphics3D", vec![]).is_graphical());
        assert!(Expr::normal("TableForm", vec![Expr::Integer(1)]).is_graphical());
        assert!(Expr::normal("MatrixForm", vec![]).is_graphical());
    }

    #[test]
    fn input_form_is_never_graphical() {
        assert!(!Expr::normal("InputForm", vec![graphics()]).is_graphical());
        assert!(!Expr::list(vec![Expr::normal("InputForm", vec![])]).is_graphical());
    }

    #[test]
    fn lists_unwrap_one_level() {
        assert!(Expr::list(vec![graphics(), Expr::Integer(1)]).is_graphical());
        assert!(!Expr::list(vec![Expr::list(vec![graphics()])]).is_graphical());
        assert!(!Expr::list(vec![]).is_graphical());
        assert!(!Expr::list(vec![Expr::Integer(1), graphics()]).is_graphical());
    }

    #[test]
    fn plain_values_are_not_graphical() {
        assert!(!Expr::Integer(2).is_graphical());
        assert!(!Expr::normal("Plus", vec![]).is_graphical());
    }

    #[test]
    fn serde_shape() {
        let json = serde_json::to_value(Expr::normal("f", vec![Expr::Integer(1)])).unwrap();
        assert_eq!(json["type"], "normal");
        assert_eq!(json["value"]["head"]["value"], "f");
        let back: Expr = serde_json::from_value(json).unwrap();
        assert_eq!(back.to_string(), "f[1]");
    }
}
