/// Final step of a fatal shutdown. Production exits the process; tests count.
pub trait ShutdownHook: Send + Sync {
    fn exit(&self, code: i32);
}

/// Terminates the process with the given status.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExit;

impl ShutdownHook for ProcessExit {
    fn exit(&self, code: i32) {
        std::process::exit(code)
    }
}
