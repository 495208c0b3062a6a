//! Parsing of Makefile-syntax .d files, as written by `gcc -MD` and friends.

use anyhow::bail;

#[derive(Debug, PartialEq)]
pub struct Deps {
    pub target: String,
    pub deps: Vec<String>,
}

/// One `outs: deps` line, after joining backslash-continued lines.
#[derive(Default)]
struct Rule {
    outs: Vec<String>,
    deps: Vec<String>,
    seen_colon: bool,
}

impl Rule {
    fn end_word(&mut self, word: &mut String) {
        if word.is_empty() {
            return;
        }
        let word = std::mem::take(word);
        if self.seen_colon {
            self.deps.push(word);
        } else {
            self.outs.push(word);
        }
    }
}

/// Parse a depfile.  The first rule names the target; later rules for the
/// same target add to its deps, and rules for anything else (the phony
/// header rules from `-MP`) are skipped.
pub fn parse(text: &str) -> anyhow::Result<Deps> {
    let mut rules: Vec<Rule> = Vec::new();
    let mut rule = Rule::default();
    let mut word = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some('\n') => {
                    chars.next();
                    rule.end_word(&mut word);
                }
                Some('\r') => {
                    chars.next();
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    rule.end_word(&mut word);
                }
                Some(&escaped) if matches!(escaped, ' ' | '#' | '\\') => {
                    chars.next();
                    word.push(escaped);
                }
                _ => word.push('\\'),
            },
            '$' if chars.peek() == Some(&'$') => {
                chars.next();
                word.push('$');
            }
            ':' if !rule.seen_colon
                && matches!(chars.peek(), None | Some(' ' | '\t' | '\r' | '\n')) =>
            {
                rule.end_word(&mut word);
                if rule.outs.is_empty() {
                    bail!("expected target before ':'");
                }
                rule.seen_colon = true;
            }
            ' ' | '\t' | '\r' => rule.end_word(&mut word),
            '\n' => {
                rule.end_word(&mut word);
                finish_rule(&mut rules, std::mem::take(&mut rule))?;
            }
            _ => word.push(c),
        }
    }
    rule.end_word(&mut word);
    finish_rule(&mut rules, rule)?;

    let target = match rules.first() {
        None => bail!("empty depfile"),
        Some(first) => first.outs[0].clone(),
    };
    let deps = rules
        .into_iter()
        .filter(|rule| rule.outs.contains(&target))
        .flat_map(|rule| rule.deps)
        .collect();
    Ok(Deps { target, deps })
}

fn finish_rule(rules: &mut Vec<Rule>, rule: Rule) -> anyhow::Result<()> {
    if rule.seen_colon {
        rules.push(rule);
    } else if !rule.outs.is_empty() {
        bail!("expected ':' after {:?}", rule.outs[0]);
    }
    Ok(())
}

/// Read and parse the depfile at `path`.  A missing file yields None, as the
/// command that writes it may not have run yet.
pub fn read(path: &str) -> anyhow::Result<Option<Deps>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => bail!("read {}: {}", path, err),
    };
    match parse(&text) {
        Ok(deps) => Ok(Some(deps)),
        Err(err) => bail!("{}: {}", path, err),
    }
}
