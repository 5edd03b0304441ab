use crate::interp::Interpreter;
use crate::{ExecError, ExecutionControl, OutputSink, RunOutcome, StopHandle, Target};
use kulla_compiler::Type;
use kulla_compiler::ir::Code;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Stack for the executor thread; deep snippet recursion runs on it.
const STACK_SIZE: usize = 256 * 1024 * 1024;

enum Request {
    Install(Code),
    Corral(Target, String),
    Remove(Target),
    Run(Code, Option<String>),
    ResetVar(String, Type),
    VarValue(String),
}

enum Reply {
    Done,
    Ran(RunOutcome),
    Value(Option<String>),
}

/// Runs an [`Interpreter`] on its own thread. Calls block until the thread
/// answers; [`StopHandle::stop`] interrupts a run from any thread.
pub struct ThreadedExecutor {
    requests: Option<Sender<Request>>,
    replies: Receiver<Result<Reply, ExecError>>,
    worker: Option<JoinHandle<()>>,
    stop: StopHandle,
    closed: bool,
}

impl ThreadedExecutor {
    pub fn spawn(out: OutputSink, err: OutputSink) -> Result<Self, ExecError> {
        let stop = StopHandle::default();
        let (request_tx, request_rx) = mpsc::channel::<Request>();
        let (reply_tx, reply_rx) = mpsc::channel();
        let worker_stop = stop.clone();
        let worker = thread::Builder::new()
            .name("kulla-exec".to_string())
            .stack_size(STACK_SIZE)
            .spawn(move || {
                let mut interp = Interpreter::with_stop_handle(out, err, worker_stop);
                for request in request_rx {
                    let reply = serve(&mut interp, request);
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
                debug!("executor thread finished");
            })
            .map_err(|err| ExecError::Internal(format!("failed to start executor thread: {err}")))?;
        Ok(Self {
            requests: Some(request_tx),
            replies: reply_rx,
            worker: Some(worker),
            stop,
            closed: false,
        })
    }

    fn request(&mut self, request: Request) -> Result<Reply, ExecError> {
        if self.closed {
            return Err(ExecError::Disconnected);
        }
        let sent = self
            .requests
            .as_ref()
            .ok_or(ExecError::Disconnected)
            .and_then(|tx| tx.send(request).map_err(|_| ExecError::Disconnected));
        let reply = sent.and_then(|()| self.replies.recv().map_err(|_| ExecError::Disconnected));
        match reply {
            Ok(reply) => reply,
            Err(err) => {
                warn!(%err, "executor thread is gone");
                self.closed = true;
                Err(err)
            }
        }
    }
}

fn serve(interp: &mut Interpreter, request: Request) -> Result<Reply, ExecError> {
    match request {
        Request::Install(code) => interp.install(code).map(|()| Reply::Done),
        Request::Corral(target, snippet) => interp.corral(target, &snippet).map(|()| Reply::Done),
        Request::Remove(target) => interp.remove(target).map(|()| Reply::Done),
        Request::Run(code, bind) => interp.run(code, bind).map(Reply::Ran),
        Request::ResetVar(name, ty) => interp.reset_var(&name, &ty).map(|()| Reply::Done),
        Request::VarValue(name) => interp.var_value(&name).map(Reply::Value),
    }
}

fn unexpected() -> ExecError {
    ExecError::Internal("unexpected reply from executor thread".to_string())
}

impl ExecutionControl for ThreadedExecutor {
    fn install(&mut self, code: Code) -> Result<(), ExecError> {
        match self.request(Request::Install(code))? {
            Reply::Done => Ok(()),
            _ => Err(unexpected()),
        }
    }

    fn corral(&mut self, target: Target, snippet: &str) -> Result<(), ExecError> {
        match self.request(Request::Corral(target, snippet.to_string()))? {
            Reply::Done => Ok(()),
            _ => Err(unexpected()),
        }
    }

    fn remove(&mut self, target: Target) -> Result<(), ExecError> {
        match self.request(Request::Remove(target))? {
            Reply::Done => Ok(()),
            _ => Err(unexpected()),
        }
    }

    fn run(&mut self, code: Code, bind: Option<String>) -> Result<RunOutcome, ExecError> {
        match self.request(Request::Run(code, bind))? {
            Reply::Ran(outcome) => {
                if outcome.exit_code.is_some() {
                    self.closed = true;
                }
                Ok(outcome)
            }
            _ => Err(unexpected()),
        }
    }

    fn reset_var(&mut self, name: &str, ty: &Type) -> Result<(), ExecError> {
        match self.request(Request::ResetVar(name.to_string(), ty.clone()))? {
            Reply::Done => Ok(()),
            _ => Err(unexpected()),
        }
    }

    fn var_value(&mut self, name: &str) -> Result<Option<String>, ExecError> {
        match self.request(Request::VarValue(name.to_string()))? {
            Reply::Value(value) => Ok(value),
            _ => Err(unexpected()),
        }
    }

    fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for ThreadedExecutor {
    fn drop(&mut self) {
        self.stop.stop();
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("executor thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ThreadedExecutor;
    use crate::{ExceptionInfo, ExecutionControl, OutputSink};
    use kulla_compiler::{
        CheckMode, Declared, ImportInfo, MethodInfo, Scope, Type, UserType, check_unit, parse_snippet,
    };
    use kulla_compiler::ir::Code;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct Methods(Vec<MethodInfo>);

    impl Scope for Methods {
        fn var(&self, _name: &str) -> Option<Type> {
            None
        }

        fn methods(&self, name: &str) -> Vec<MethodInfo> {
            self.0.iter().filter(|m| m.name == name).cloned().collect()
        }

        fn user_type(&self, _name: &str) -> Option<UserType> {
            None
        }

        fn imports(&self) -> Vec<ImportInfo> {
            Vec::new()
        }

        fn has_external_type(&self, _name: &str) -> bool {
            false
        }

        fn has_external_package(&self, _name: &str) -> bool {
            false
        }
    }

    fn compile(scope: &Methods, source: &str, id: &str) -> (Declared, Code) {
        let unit = parse_snippet(source)
            .expect("snippet should parse")
            .into_iter()
            .next()
            .expect("one unit");
        let analysis = check_unit(&unit, scope, CheckMode::Fresh, id);
        assert!(analysis.error_diags().is_empty(), "errors: {:?}", analysis.error_diags());
        (analysis.declared, analysis.code)
    }

    fn executor() -> ThreadedExecutor {
        let out: OutputSink = Arc::new(Mutex::new(Vec::new()));
        let err: OutputSink = Arc::new(Mutex::new(Vec::new()));
        ThreadedExecutor::spawn(out, err).expect("executor should start")
    }

    #[test]
    fn stop_interrupts_a_busy_loop() {
        let mut exec = executor();
        let (_, code) = compile(&Methods::default(), "while (true) { }", "1");
        let handle = exec.stop_handle();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            handle.stop();
        });
        let outcome = exec.run(code, None).expect("run should return");
        stopper.join().expect("stopper thread");
        assert_eq!(outcome.exception, Some(ExceptionInfo::Stopped));

        let (_, code) = compile(&Methods::default(), "1 + 1", "2");
        let outcome = exec.run(code, Some("$2".to_string())).expect("run should return");
        assert_eq!(outcome.value.as_deref(), Some("2"));
    }

    #[test]
    fn runaway_recursion_overflows() {
        let mut exec = executor();
        let mut scope = Methods::default();
        let (declared, code) = compile(&scope, "int down(int n) { return down(n + 1); }", "1");
        let Declared::Method(info) = declared else {
            panic!("expected a method declaration");
        };
        scope.0.push(info);
        exec.install(code).expect("install should work");
        let (_, code) = compile(&scope, "down(0)", "2");
        let outcome = exec.run(code, Some("$1".to_string())).expect("run should return");
        match outcome.exception {
            Some(ExceptionInfo::Eval { class_name, stack, .. }) => {
                assert_eq!(class_name, "java.lang.StackOverflowError");
                assert_eq!(stack.first().map(|f| f.method_name.as_str()), Some("down"));
            }
            other => panic!("expected a stack overflow, got {other:?}"),
        }
    }

    #[test]
    fn exit_closes_the_executor() {
        let mut exec = executor();
        let (_, code) = compile(&Methods::default(), "System.exit(0);", "1");
        let outcome = exec.run(code, None).expect("run should return");
        assert_eq!(outcome.exit_code, Some(0));
        assert!(exec.is_closed());
        let (_, code) = compile(&Methods::default(), "1", "2");
        assert!(exec.run(code, None).is_err());
    }
}
