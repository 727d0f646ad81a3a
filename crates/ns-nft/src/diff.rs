use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

/// Result of comparing two dumps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpDiff {
    pub matches: bool,
    pub diff: Option<String>,
}

impl DumpDiff {
    pub fn display(&self) {
        match &self.diff {
            None => println!("✅ Rulesets match"),
            Some(diff) => {
                println!("⚠️  Rulesets differ:\n");
                print!("{}", diff);
            }
        }
    }
}

/// Line diff from `current` to `desired`
pub fn diff_dumps(current: &str, desired: &str) -> DumpDiff {
    if current == desired {
        return DumpDiff {
            matches: true,
            diff: None,
        };
    }

    DumpDiff {
        matches: false,
        diff: Some(render_diff(current, desired)),
    }
}

fn render_diff(current: &str, desired: &str) -> String {
    let diff = TextDiff::from_lines(current, desired);
    let mut output = String::new();

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => '-',
            ChangeTag::Insert => '+',
            ChangeTag::Equal => ' ',
        };
        output.push(sign);
        output.push_str(change.value());
    }

    output
}
