use arbor_vm::{Interpreter, RunError, Settings};
use std::thread;

/// Runs `f` on a thread with room for deep Python recursion.
fn with_big_stack<R: Send>(f: impl FnOnce() -> R + Send) -> R {
    thread::scope(|scope| {
        thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn_scoped(scope, f)
            .unwrap()
            .join()
            .unwrap()
    })
}

fn capturing() -> Settings {
    Settings {
        capture_output: true,
        ..Settings::default()
    }
}

/// Runs `source` as `__main__` and returns what it printed.
pub fn run(source: &str) -> String {
    run_with(source, &[])
}

/// Like [`run`], with importable modules registered first.
pub fn run_with(source: &str, modules: &[(&str, &str)]) -> String {
    with_big_stack(|| {
        Interpreter::new(capturing()).enter(|vm| {
            for (name, module) in modules {
                vm.add_module_source(name, module);
            }
            if let Err(e) = vm.run_source(source, "<test>") {
                panic!("{e}\noutput so far:\n{}", vm.take_output());
            }
            vm.take_output()
        })
    })
}

/// Runs `source` expecting it to fail; returns the error message.
pub fn run_error(source: &str) -> String {
    with_big_stack(|| {
        Interpreter::new(capturing()).enter(|vm| match vm.run_source(source, "<test>") {
            Ok(_) => panic!("expected an error, printed:\n{}", vm.take_output()),
            Err(RunError::Exception { message, .. }) => message,
            Err(e) => e.to_string(),
        })
    })
}
