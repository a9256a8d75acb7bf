//! The node acceptance suites.

pub mod execute;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::path::Path;
    use std::time::Duration;

    use cvt_common::{CheckResult, CommandResult, CommandRunner, CommandSpec};

    /// Answers by program name; unknown programs exit 127.
    pub struct FakeNode {
        pub responses: Vec<(&'static str, i32, String)>,
        pub seen: RefCell<Vec<CommandSpec>>,
    }

    impl FakeNode {
        pub fn new(responses: Vec<(&'static str, i32, String)>) -> Self {
            Self {
                responses,
                seen: RefCell::new(Vec::new()),
            }
        }

        pub fn calls_to(&self, program: &str) -> Vec<CommandSpec> {
            self.seen
                .borrow()
                .iter()
                .filter(|spec| name_of(&spec.program) == program)
                .cloned()
                .collect()
        }
    }

    fn name_of(program: &str) -> &str {
        Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(program)
    }

    impl CommandRunner for FakeNode {
        fn run(&self, spec: &CommandSpec) -> CheckResult<CommandResult> {
            self.seen.borrow_mut().push(spec.clone());
            let (exit_code, stdout) = self
                .responses
                .iter()
                .find(|(name, _, _)| *name == name_of(&spec.program))
                .map(|(_, code, out)| (*code, out.clone()))
                .unwrap_or((127, String::new()));
            Ok(CommandResult {
                exit_code,
                stdout,
                stderr: if exit_code == 0 {
                    String::new()
                } else {
                    format!("{} failed", spec.program)
                },
                duration: Duration::ZERO,
                timed_out: false,
            })
        }
    }
}
