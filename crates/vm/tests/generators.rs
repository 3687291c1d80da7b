mod common;

use common::{run, run_error};

#[test]
fn locals_survive_suspension() {
    let output = run(r#"
def g():
    x = 1
    yield x
    x += 1
    yield x
it = g()
print(next(it), next(it), next(it, "end"))
"#);
    assert_eq!(output, "1 2 end\n");
}

#[test]
fn closing_runs_nothing_more() {
    let output = run(r#"
def g():
    x = 1
    yield x
    print("resumed")
    x += 1
    yield x
it = g()
print(next(it))
it.close()
print(next(it, "closed"))
"#);
    assert_eq!(output, "1\nclosed\n");
}

#[test]
fn for_loops_advance_one_iterator() {
    let output = run(r#"
class Once:
    def __init__(self, n):
        self.n = n
        self.handed_out = False
    def __iter__(self):
        if self.handed_out:
            raise RuntimeError("iterated twice")
        self.handed_out = True
        return self
    def __next__(self):
        if self.n == 0:
            raise StopIteration
        self.n -= 1
        return self.n

def g(source):
    for i in source:
        yield i * 10
print(list(g(Once(3))))
"#);
    assert_eq!(output, "[20, 10, 0]\n");
}

#[test]
fn send_delivers_values_to_the_suspended_yield() {
    let output = run(r#"
def accumulate():
    total = 0
    while True:
        value = yield total
        if value is None:
            return total
        total += value
acc = accumulate()
print(next(acc), acc.send(5), acc.send(7))
try:
    acc.send(None)
except StopIteration as stop:
    print("returned", stop.value)
"#);
    assert_eq!(output, "0 5 12\nreturned 12\n");
}

#[test]
fn just_started_generators_reject_values() {
    let message = run_error("def g():\n    yield 1\ng().send(3)\n");
    assert_eq!(
        message,
        "TypeError: can't send non-None value to a just-started generator"
    );
}

#[test]
fn yields_inside_expressions_keep_evaluated_operands() {
    let output = run(r#"
calls = []
def side(v):
    calls.append(v)
    return v
def g():
    result = side(1) + (yield "first") + side(2)
    yield result
it = g()
print(next(it))
print(it.send(10), calls)
"#);
    assert_eq!(output, "first\n13 [1, 2]\n");
}

#[test]
fn try_finally_runs_on_close_and_on_exhaustion() {
    let output = run(r#"
def g(tag):
    try:
        yield 1
        yield 2
    finally:
        print("finally", tag)
it = g("closed")
next(it)
it.close()
print(list(g("exhausted")))
"#);
    assert_eq!(output, "finally closed\nfinally exhausted\n[1, 2]\n");
}

#[test]
fn thrown_exceptions_reach_handlers() {
    let output = run(r#"
def g():
    while True:
        try:
            yield "ready"
        except ValueError as e:
            print("handled", e)
it = g()
next(it)
print(it.throw(ValueError("first")))
print(it.throw(ValueError, "second"))
try:
    it.throw(KeyError("k"))
except KeyError:
    print("escaped")
print(next(it, "finished"))
"#);
    assert_eq!(
        output,
        "handled first\nready\nhandled second\nready\nescaped\nfinished\n"
    );
}

#[test]
fn handlers_may_yield() {
    let output = run(r#"
def g():
    try:
        raise KeyError("boom")
    except KeyError as e:
        yield "in handler"
        yield repr(e)
    else:
        yield "unreachable"
    yield "after"
print(list(g()))
"#);
    assert_eq!(output, "['in handler', \"KeyError('boom')\", 'after']\n");
}

#[test]
fn yields_nested_in_yields_resume_innermost_first() {
    let output = run(r#"
def g():
    x = yield (yield 1)
    yield ("got", x)
it = g()
print(next(it))
print(it.send(5))
print(it.send(7))
"#);
    assert_eq!(output, "1\n5\n('got', 7)\n");
}

#[test]
fn yield_from_a_yielded_iterable() {
    let output = run(r#"
def g():
    r = yield from (yield "first")
    yield ("result", r)
it = g()
print(next(it))
print(it.send([1, 2]))
print(next(it))
print(next(it))
"#);
    assert_eq!(output, "first\n1\n2\n('result', None)\n");
}

#[test]
fn yield_from_delegates_and_returns() {
    let output = run(r#"
def inner():
    received = yield "a"
    yield received
    return "inner done"
def outer():
    result = yield from inner()
    yield result
    yield from [1, 2]
it = outer()
print(next(it), it.send("sent"), next(it), list(it))
"#);
    assert_eq!(output, "a sent inner done [1, 2]\n");
}

#[test]
fn loop_else_with_yields() {
    let output = run(r#"
def g(stop_at):
    for i in range(3):
        if i == stop_at:
            break
        yield i
    else:
        yield "no break"
    yield "end"
print(list(g(5)), list(g(1)))
"#);
    assert_eq!(output, "[0, 1, 2, 'no break', 'end'] [0, 'end']\n");
}

#[test]
fn with_blocks_span_suspensions() {
    let output = run(r#"
class Manager:
    def __enter__(self):
        print("enter")
        return "resource"
    def __exit__(self, *exc):
        print("exit", exc[0] is None)
        return False
def g():
    with Manager() as r:
        yield r
        yield r.upper()
    yield "outside"
print(list(g()))
"#);
    assert_eq!(output, "enter\nexit True\n['resource', 'RESOURCE', 'outside']\n");
}

#[test]
fn generator_expressions_are_lazy() {
    let output = run(r#"
def noisy(n):
    print("make", n)
    return n
squares = (noisy(n) * noisy(n) for n in range(3))
print("created")
print(next(squares))
print(sum(squares))
"#);
    assert_eq!(
        output,
        "created\nmake 0\nmake 0\n0\nmake 1\nmake 1\nmake 2\nmake 2\n5\n"
    );
}

#[test]
fn stop_iteration_inside_a_generator_becomes_runtime_error() {
    let message = run_error("def g():\n    yield next(iter([]))\nlist(g())\n");
    assert_eq!(message, "RuntimeError: generator raised StopIteration");
    let output = run(r#"
def g():
    yield next(iter([]))
try:
    list(g())
except RuntimeError as e:
    print(type(e.__cause__).__name__, e.args)
"#);
    assert_eq!(output, "StopIteration ('generator raised StopIteration',)\n");
}

#[test]
fn running_generators_cannot_be_reentered() {
    let message = run_error(r#"
def g():
    yield next(it)
it = g()
next(it)
"#);
    assert_eq!(message, "ValueError: generator already executing");
}

#[test]
fn ignoring_generator_exit_is_an_error() {
    let message = run_error(r#"
def g():
    while True:
        try:
            yield
        except GeneratorExit:
            pass
it = g()
next(it)
it.close()
"#);
    assert_eq!(message, "RuntimeError: generator ignored GeneratorExit");
}
