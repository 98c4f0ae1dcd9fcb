//! Input history: the manager trait and the in-memory default.

use std::collections::HashSet;

use crate::protocol::{HistAccessType, HistoryEntry, HistoryReply, HistoryRequest};

/// Storage behind `history_request`.
pub trait HistoryManager: Send {
    /// Record one executed input. Session 0 is the current session.
    fn store_inputs(&mut self, session: i64, line: u32, input: &str);

    /// The last `n` entries.
    fn tail(&self, n: usize, raw: bool, output: bool) -> HistoryReply;

    /// Entries of `session` with `start <= line < stop`.
    fn range(&self, session: i64, start: u32, stop: u32, raw: bool, output: bool) -> HistoryReply;

    /// Entries whose input matches the glob `pattern`, keeping the last `n`
    /// (all when `n` is 0).
    fn search(&self, pattern: &str, raw: bool, output: bool, n: usize, unique: bool) -> HistoryReply;

    fn process_request(&self, request: &HistoryRequest) -> HistoryReply {
        match request.hist_access_type {
            HistAccessType::Tail => self.tail(request.n, request.raw, request.output),
            HistAccessType::Range => self.range(
                request.session,
                request.start,
                request.stop,
                request.raw,
                request.output,
            ),
            HistAccessType::Search => self.search(
                &request.pattern,
                request.raw,
                request.output,
                request.n,
                request.unique,
            ),
        }
    }
}

#[derive(Debug, Clone)]
struct Record {
    session: i64,
    line: u32,
    input: String,
}

impl Record {
    fn entry(&self, output: bool) -> HistoryEntry {
        if output {
            HistoryEntry::WithOutput(self.session, self.line, (self.input.clone(), None))
        } else {
            HistoryEntry::Input(self.session, self.line, self.input.clone())
        }
    }
}

/// History kept for the lifetime of the kernel process.
///
/// Only one session exists, outputs are not recorded, and raw and
/// transformed input are the same.
#[derive(Debug, Clone)]
pub struct InMemoryHistory {
    session: i64,
    records: Vec<Record>,
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self {
            session: 1,
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Session 0 and negative offsets all mean the current session.
    fn resolve(&self, session: i64) -> i64 {
        if session <= 0 {
            self.session
        } else {
            session
        }
    }
}

impl HistoryManager for InMemoryHistory {
    fn store_inputs(&mut self, session: i64, line: u32, input: &str) {
        let session = self.resolve(session);
        self.records.push(Record {
            session,
            line,
            input: input.to_string(),
        });
    }

    fn tail(&self, n: usize, _raw: bool, output: bool) -> HistoryReply {
        let skip = self.records.len().saturating_sub(n);
        HistoryReply::Ok {
            history: self.records[skip..].iter().map(|r| r.entry(output)).collect(),
        }
    }

    fn range(&self, session: i64, start: u32, stop: u32, _raw: bool, output: bool) -> HistoryReply {
        if start > stop {
            return HistoryReply::Error {
                ename: "HistoryRangeError".to_string(),
                evalue: format!("start ({start}) is greater than stop ({stop})"),
            };
        }
        let session = self.resolve(session);
        HistoryReply::Ok {
            history: self
                .records
                .iter()
                .filter(|r| r.session == session && r.line >= start && r.line < stop)
                .map(|r| r.entry(output))
                .collect(),
        }
    }

    fn search(&self, pattern: &str, _raw: bool, output: bool, n: usize, unique: bool) -> HistoryReply {
        let glob = Glob::new(pattern);
        let mut matched: Vec<&Record> = self.records.iter().filter(|r| glob.matches(&r.input)).collect();

        if unique {
            let mut seen = HashSet::new();
            matched.reverse();
            matched.retain(|&r| seen.insert(r.input.as_str()));
            matched.reverse();
        }
        if n > 0 {
            let skip = matched.len().saturating_sub(n);
            matched.drain(..skip);
        }

        HistoryReply::Ok {
            history: matched.into_iter().map(|r| r.entry(output)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(char),
    AnyOne,
    AnyRun,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl Token {
    fn accepts(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyOne => true,
            Token::AnyRun => false,
            Token::Class { negated, ranges } => {
                ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi) != *negated
            }
        }
    }
}

/// Anchored shell-style glob: `*`, `?`, `[...]` (negated with `!` or `^`)
/// and `\` escapes.
#[derive(Debug, Clone, PartialEq)]
pub struct Glob {
    tokens: Vec<Token>,
}

impl Glob {
    pub fn new(pattern: &str) -> Self {
        let chars: Vec<char> = pattern.chars().collect();
        let mut tokens = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '*' => {
                    if tokens.last() != Some(&Token::AnyRun) {
                        tokens.push(Token::AnyRun);
                    }
                    i += 1;
                }
                '?' => {
                    tokens.push(Token::AnyOne);
                    i += 1;
                }
                '\\' if i + 1 < chars.len() => {
                    tokens.push(Token::Literal(chars[i + 1]));
                    i += 2;
                }
                '[' => match parse_class(&chars, i + 1) {
                    Some((class, next)) => {
                        tokens.push(class);
                        i = next;
                    }
                    None => {
                        tokens.push(Token::Literal('['));
                        i += 1;
                    }
                },
                c => {
                    tokens.push(Token::Literal(c));
                    i += 1;
                }
            }
        }

        Self { tokens }
    }

    /// Whether the whole of `text` matches.
    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let (mut t, mut p) = (0, 0);
        // Position of the last `*` and the text index it currently absorbs up to.
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            if let Some(token) = self.tokens.get(p) {
                if *token == Token::AnyRun {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                if token.accepts(text[t]) {
                    p += 1;
                    t += 1;
                    continue;
                }
            }
            match backtrack {
                Some((star, absorbed)) => {
                    p = star + 1;
                    t = absorbed + 1;
                    backtrack = Some((star, absorbed + 1));
                }
                None => return false,
            }
        }

        self.tokens[p..].iter().all(|token| *token == Token::AnyRun)
    }
}

/// Parse a class body starting after `[`. Returns the token and the index
/// after the closing `]`, or `None` if the class is never closed.
fn parse_class(chars: &[char], mut i: usize) -> Option<(Token, usize)> {
    let negated = matches!(chars.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }

    let mut ranges = Vec::new();
    let mut first = true;
    loop {
        let c = *chars.get(i)?;
        if c == ']' && !first {
            return Some((Token::Class { negated, ranges }, i + 1));
        }
        first = false;

        let lo = if c == '\\' {
            i += 1;
            *chars.get(i)?
        } else {
            c
        };
        i += 1;

        if chars.get(i) == Some(&'-') && chars.get(i + 1).is_some_and(|&next| next != ']') {
            let hi = chars[i + 1];
            ranges.push((lo, hi));
            i += 2;
        } else {
            ranges.push((lo, lo));
        }
    }
}
