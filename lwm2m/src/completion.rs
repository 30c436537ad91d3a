//! Tab completion for the operator shell

use crate::shell::{Shell, Target};
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};
use tokio::runtime::Handle;

const COMMANDS: [&str; 4] = ["bootstrap", "lwm2m", "help", "exit"];
const BOOTSTRAP_VERBS: [&str; 7] = [
    "list", "info", "discover", "read", "write", "delete", "finish",
];
const LWM2M_VERBS: [&str; 6] = ["list", "info", "discover", "read", "write", "delete"];

fn target(name: &str) -> Option<Target> {
    match name {
        "bootstrap" => Some(Target::Bootstrap),
        "lwm2m" => Some(Target::Lwm2m),
        _ => None,
    }
}

fn verbs(target: Target) -> &'static [&'static str] {
    match target {
        Target::Bootstrap => &BOOTSTRAP_VERBS,
        Target::Lwm2m => &LWM2M_VERBS,
    }
}

/// Completions for the word ending at the end of `line`
///
/// `clients` is asked for the client names of a server only when the
/// cursor sits on a `<client>` argument.
///
/// # Returns
/// The byte offset where the word starts and the matching candidates
pub fn complete_words<F>(line: &str, clients: F) -> (usize, Vec<String>)
where
    F: FnOnce(Target) -> Vec<String>,
{
    let start = line
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map_or(0, |(i, c)| i + c.len_utf8());
    let word = &line[start..];
    let previous: Vec<&str> = line[..start].split_whitespace().collect();

    let candidates: Vec<String> = match previous.as_slice() {
        [] => COMMANDS.iter().map(|c| c.to_string()).collect(),
        [name] => target(name)
            .map(|t| verbs(t).iter().map(|v| v.to_string()).collect())
            .unwrap_or_default(),
        [name, verb] => match target(name) {
            Some(t) if *verb != "list" && verbs(t).contains(verb) => clients(t),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let matching = candidates
        .into_iter()
        .filter(|candidate| candidate.starts_with(word))
        .collect();
    (start, matching)
}

/// rustyline helper completing commands and client names
///
/// Client names are fetched from the live registries through `runtime`,
/// so the editor must run outside the runtime's worker threads.
pub struct ShellHelper {
    runtime: Handle,
    shell: Shell,
}

impl ShellHelper {
    pub fn new(runtime: Handle, shell: Shell) -> Self {
        Self { runtime, shell }
    }

    pub fn candidates(&self, line: &str) -> (usize, Vec<String>) {
        complete_words(line, |target| {
            self.runtime.block_on(self.shell.operations(target).list())
        })
    }
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let (start, words) = self.candidates(&line[..pos]);
        let pairs = words
            .into_iter()
            .map(|word| Pair {
                display: word.clone(),
                replacement: word,
            })
            .collect();
        Ok((start, pairs))
    }
}

impl Hinter for ShellHelper {
    type Hint = String;
}

impl Highlighter for ShellHelper {}

impl Validator for ShellHelper {}

impl Helper for ShellHelper {}
