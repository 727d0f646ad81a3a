use crate::config::Define;
use crate::types::{BaseChainHook, BaseChainType, Family};
use ipnet::IpNet;
use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(.*) comment "((?:[^"\\]|\\.)*)"$"#).expect("valid comment regex")
});

static MAP_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^((?:[^"]|"(?:[^"\\]|\\.)*")+?) : ((?:[^"]|"(?:[^"\\]|\\.)*")+)$"#)
        .expect("valid map value regex")
});

/// A value that can be spliced into a rule body by [`concat`] / [`nft_concat!`]
pub trait ConcatArg {
    fn append_to(&self, words: &mut Vec<String>);
}

impl ConcatArg for str {
    fn append_to(&self, words: &mut Vec<String>) {
        words.push(self.to_string());
    }
}

impl ConcatArg for String {
    fn append_to(&self, words: &mut Vec<String>) {
        words.push(self.clone());
    }
}

// Empty lists contribute nothing, so they never leave a double space behind.
impl<T: AsRef<str>> ConcatArg for [T] {
    fn append_to(&self, words: &mut Vec<String>) {
        words.extend(self.iter().map(|w| w.as_ref().to_string()));
    }
}

impl<T: AsRef<str>> ConcatArg for Vec<T> {
    fn append_to(&self, words: &mut Vec<String>) {
        self.as_slice().append_to(words);
    }
}

impl<T: AsRef<str>, const N: usize> ConcatArg for [T; N] {
    fn append_to(&self, words: &mut Vec<String>) {
        self.as_slice().append_to(words);
    }
}

impl<T: ConcatArg + ?Sized> ConcatArg for &T {
    fn append_to(&self, words: &mut Vec<String>) {
        (**self).append_to(words);
    }
}

macro_rules! concat_display {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ConcatArg for $ty {
                fn append_to(&self, words: &mut Vec<String>) {
                    words.push(self.to_string());
                }
            }
        )*
    };
}

concat_display!(
    i8, i16, i32, i64, isize, u8, u16, u32, u64, usize,
    Family, BaseChainType, BaseChainHook, IpAddr, IpNet,
);

/// Join arguments into a single space-separated rule body
pub fn concat(args: &[&dyn ConcatArg]) -> String {
    let mut words = Vec::new();
    for arg in args {
        arg.append_to(&mut words);
    }
    words.join(" ")
}

/// Variadic form of [`concat`]: `nft_concat!(Family::Ip, "saddr", cidr, "drop")`
#[macro_export]
macro_rules! nft_concat {
    ($($arg:expr),* $(,)?) => {
        $crate::util::concat(&[$(&$arg as &dyn $crate::util::ConcatArg),*])
    };
}

/// Join the parts of a concatenated set/map key or value
pub fn join<T: AsRef<str>>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.as_ref())
        .collect::<Vec<_>>()
        .join(" . ")
}

/// Split a rendered set/map key or value into its parts
pub fn split(values: &str) -> Vec<String> {
    values.split(" . ").map(str::to_string).collect()
}

/// Split a trailing `comment "..."` clause off `line`, undoing [`quote`]'s escapes
pub fn split_comment(line: &str) -> (String, Option<String>) {
    match COMMENT_RE.captures(line) {
        Some(caps) => (caps[1].to_string(), Some(unescape(&caps[2]))),
        None => (line.to_string(), None),
    }
}

/// Split a map element body into key, optional comment, and value, skipping over quoted
/// strings whose contents look like nftables syntax
pub fn split_map_value(line: &str) -> Option<(String, Option<String>, String)> {
    let caps = MAP_VALUE_RE.captures(line)?;
    let (key, comment) = split_comment(&caps[1]);
    Some((key, comment, caps[2].to_string()))
}

/// Render a string as a double-quoted nft literal
pub fn quote(value: &str) -> String {
    format!("{:?}", value)
}

/// Inverse of [`quote`] for the contents between the quotes
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Replace `$name` occurrences with their define values, in definition order
pub fn substitute_defines(value: &str, defines: &[Define]) -> String {
    let mut out = value.to_string();
    for define in defines {
        out = out.replace(&format!("${}", define.name), &define.value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat() {
        let cidr: IpNet = "10.2.0.0/24".parse().unwrap();
        let none: Vec<String> = Vec::new();

        assert_eq!(concat(&[]), "");
        assert_eq!(nft_concat!("foo"), "foo");
        assert_eq!(nft_concat!(["foo", "bar", "baz"]), "foo bar baz");
        assert_eq!(nft_concat!("foo", ["bar", "baz"], "quux"), "foo bar baz quux");
        assert_eq!(nft_concat!("foo", none, "bar", "baz"), "foo bar baz");
        assert_eq!(nft_concat!(1, 65535u16, -123456789i64), "1 65535 -123456789");
        assert_eq!(
            nft_concat!(
                Family::Ip,
                "saddr",
                cidr,
                none,
                "th port",
                8080,
                vec!["ct", "state", "established"],
                "drop",
            ),
            "ip saddr 10.2.0.0/24 th port 8080 ct state established drop"
        );
    }

    #[test]
    fn test_split_comment() {
        assert_eq!(
            split_comment("masquerade comment \"snat it\""),
            ("masquerade".to_string(), Some("snat it".to_string()))
        );
        assert_eq!(split_comment("ip daddr 10.0.0.1 drop"), ("ip daddr 10.0.0.1 drop".to_string(), None));
        assert_eq!(split_comment("comment \"x\""), ("comment \"x\"".to_string(), None));

        let line = format!("drop comment {}", quote(r#"say "hi" \ bye"#));
        assert_eq!(
            split_comment(&line),
            ("drop".to_string(), Some(r#"say "hi" \ bye"#.to_string()))
        );
    }

    #[test]
    fn test_split_map_value() {
        assert_eq!(
            split_map_value("192.168.0.2 . tcp . 443 comment \"with a comment\" : goto anotherchain"),
            Some((
                "192.168.0.2 . tcp . 443".to_string(),
                Some("with a comment".to_string()),
                "goto anotherchain".to_string()
            ))
        );
        assert_eq!(
            split_map_value("\"a : b\" : drop"),
            Some(("\"a : b\"".to_string(), None, "drop".to_string()))
        );
        assert_eq!(split_map_value("10.0.0.1"), None);
    }

    #[test]
    fn test_join_and_split() {
        assert_eq!(join(&["10.0.0.1", "tcp", "80"]), "10.0.0.1 . tcp . 80");
        assert_eq!(split("10.0.0.1 . tcp . 80"), vec!["10.0.0.1", "tcp", "80"]);
    }

    #[test]
    fn test_substitute_defines() {
        let defines = vec![
            Define::new("IP", "ip"),
            Define::new("INET_ADDR", "ipv4_addr"),
        ];
        assert_eq!(
            substitute_defines("$IP saddr . $IP daddr : $INET_ADDR", &defines),
            "ip saddr . ip daddr : ipv4_addr"
        );
    }
}
