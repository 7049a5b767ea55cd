//! Command tokenizing and argument sanitization.
//!
//! Commands are split into an argument vector and run against the binary
//! directly, so these checks sit in front of an execution path that never
//! involves a shell.

use std::collections::HashSet;

use crate::config::ExecutorConfig;
use crate::error::SafetyError;

/// Characters rejected in any argument.
pub const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '<', '>', '\\', '!', '*', '?', '~',
    '\'', '"', '\n', '\r',
];

/// Binary, verbs and paths a command may use.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    binary: String,
    allowed_verbs: HashSet<String>,
    allowed_path_prefix: String,
}

impl CommandPolicy {
    pub fn new(
        binary: impl Into<String>,
        allowed_verbs: impl IntoIterator<Item = impl Into<String>>,
        allowed_path_prefix: impl Into<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            allowed_verbs: allowed_verbs.into_iter().map(Into::into).collect(),
            allowed_path_prefix: allowed_path_prefix.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(
            config.binary.clone(),
            config.allowed_verbs.iter().cloned(),
            config.allowed_path_prefix.clone(),
        )
    }

    #[must_use]
    pub fn binary(&self) -> &str {
        &self.binary
    }

    #[must_use]
    pub fn allows_verb(&self, verb: &str) -> bool {
        self.allowed_verbs.contains(verb)
    }

    /// Validate a command and return its argument vector.
    pub fn validate(&self, command: &str) -> Result<Vec<String>, SafetyError> {
        // Tokenizing folds line breaks into whitespace, so check the raw line first
        if let Some(ch) = command.chars().find(|c| matches!(c, '\n' | '\r')) {
            return Err(SafetyError::Injection {
                arg: command.to_string(),
                ch,
            });
        }
        let argv = tokenize(command);
        let Some(binary) = argv.first() else {
            return Err(SafetyError::Empty);
        };
        if *binary != self.binary {
            return Err(SafetyError::WrongBinary {
                expected: self.binary.clone(),
                got: binary.clone(),
            });
        }

        let verb = argv.get(1).map_or("", String::as_str);
        if verb == "scale" && scales_to_zero(&argv[2..]) {
            return Err(SafetyError::ScaleToZero);
        }
        if !self.allows_verb(verb) {
            return Err(SafetyError::NotAllowed {
                verb: verb.to_string(),
            });
        }

        for arg in &argv[1..] {
            validate_arg(arg)?;
            self.validate_path(arg)?;
        }
        Ok(argv)
    }

    fn validate_path(&self, arg: &str) -> Result<(), SafetyError> {
        if arg.contains("..") {
            return Err(SafetyError::PathTraversal {
                arg: arg.to_string(),
            });
        }
        // Flags like --filename=/etc/passwd carry their path after '='
        let value = arg.split_once('=').map_or(arg, |(_, v)| v);
        if value.starts_with('/') && !self.within_allowed_prefix(value) {
            return Err(SafetyError::PathTraversal {
                arg: arg.to_string(),
            });
        }
        Ok(())
    }

    fn within_allowed_prefix(&self, path: &str) -> bool {
        let prefix = self.allowed_path_prefix.trim_end_matches('/');
        path.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

/// Split a command into arguments on whitespace.
#[must_use]
pub fn tokenize(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// Reject an argument carrying any shell metacharacter.
pub fn validate_arg(arg: &str) -> Result<(), SafetyError> {
    match arg.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        Some(ch) => Err(SafetyError::Injection {
            arg: arg.to_string(),
            ch,
        }),
        None => Ok(()),
    }
}

/// Whether scale arguments set replicas to zero.
#[must_use]
pub fn scales_to_zero(args: &[String]) -> bool {
    let is_zero = |v: &str| v.trim().parse::<i64>().is_ok_and(|n| n == 0);
    args.iter().enumerate().any(|(i, arg)| {
        if let Some((key, value)) = arg.split_once('=') {
            key.trim_start_matches('-') == "replicas" && is_zero(value)
        } else if arg == "--replicas" {
            args.get(i + 1).is_some_and(|v| is_zero(v))
        } else {
            false
        }
    })
}

/// Whether the argument vector already names a namespace.
#[must_use]
pub fn has_namespace_flag(argv: &[String]) -> bool {
    argv.iter().any(|arg| {
        arg == "-n"
            || arg == "--namespace"
            || arg == "-A"
            || arg == "--all-namespaces"
            || arg.starts_with("--namespace=")
            || arg.starts_with("-n=")
    })
}
