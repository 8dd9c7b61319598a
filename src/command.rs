//! Typed command descriptors.
//!
//! External tools are described as a program plus an argument vector and an
//! optional stdin payload. Nothing is interpolated into shell strings; the
//! only place argv is flattened is [`CommandSpec::to_shell_string`], used by
//! hosts whose transport hands a single string to a remote shell.

use std::fmt;

use crate::error::{HarnessError, Result};

/// A subprocess invocation, independent of the host it runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    /// Create a command for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    /// Run `script` through `sh -c`.
    ///
    /// Explicit shell indirection; use only for fixed scripts.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Bytes written to the process's stdin, which is then closed.
    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    pub fn get_program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_stdin(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str))
    }

    /// Quote argv into one string that a POSIX shell splits back into the
    /// same words.
    pub fn to_shell_string(&self) -> Result<String> {
        shlex::try_join(self.argv())
            .map_err(|e| HarnessError::InvalidCommand(format!("{}: {}", self.program, e)))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_argument_order() {
        let spec = CommandSpec::new("ncdevmem")
            .arg("-f")
            .arg("eth0")
            .args(["-p", "5201"]);
        assert_eq!(spec.get_program(), "ncdevmem");
        assert_eq!(spec.get_args(), &["-f", "eth0", "-p", "5201"]);
        assert_eq!(spec.to_string(), "ncdevmem -f eth0 -p 5201");
        assert!(spec.get_stdin().is_none());
    }

    #[test]
    fn test_shell_constructor() {
        let spec = CommandSpec::shell("cat /proc/net/tcp6");
        assert_eq!(
            spec.argv().collect::<Vec<_>>(),
            vec!["sh", "-c", "cat /proc/net/tcp6"]
        );
    }

    #[test]
    fn test_shell_string_round_trips() {
        let spec = CommandSpec::new("/tmp/dir with space/ncdevmem")
            .args(["-f", "eth0", "-s", "it's"]);
        let joined = spec.to_shell_string().unwrap();
        let words = shlex::split(&joined).unwrap();
        assert_eq!(
            words,
            vec!["/tmp/dir with space/ncdevmem", "-f", "eth0", "-s", "it's"]
        );
    }

    #[test]
    fn test_shell_string_rejects_nul() {
        let spec = CommandSpec::new("echo").arg("a\0b");
        assert!(matches!(
            spec.to_shell_string(),
            Err(HarnessError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_stdin_payload() {
        let spec = CommandSpec::new("socat").stdin("hello\nworld\n");
        assert_eq!(spec.get_stdin(), Some(b"hello\nworld\n".as_slice()));
    }
}
