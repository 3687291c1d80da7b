mod common;

use common::{run, run_error, run_with};

#[test]
fn star_unpacking_evaluates_the_value_once() {
    let output = run(r#"
calls = []
def source():
    calls.append(1)
    return [1, 2, 3, 4, 5]
a, *b, c = source()
print(a, b, c, len(calls))
first, *rest = "xy"
print(first, rest)
"#);
    assert_eq!(output, "1 [2, 3, 4] 5 1\nx ['y']\n");
}

#[test]
fn unpacking_counts_are_checked() {
    let message = run_error("a, b = [1, 2, 3]\n");
    assert_eq!(message, "ValueError: too many values to unpack (expected 2)");
    let message = run_error("a, *b, c = [1]\n");
    assert_eq!(
        message,
        "ValueError: not enough values to unpack (expected at least 2, got 1)"
    );
}

#[test]
fn chained_comparisons_evaluate_each_operand_once() {
    let output = run(r#"
def probe(name, value):
    print(name)
    return value
print(probe("f", 1) < probe("g", 2) <= probe("h", 3))
print(probe("f", 3) < probe("g", 2) <= probe("h", 3))
"#);
    assert_eq!(output, "f\ng\nh\nTrue\nf\ng\nFalse\n");
}

#[test]
fn closures_share_cells() {
    let output = run(r#"
def counter():
    count = 0
    def bump():
        nonlocal count
        count += 1
        return count
    def peek():
        return count
    return bump, peek
bump, peek = counter()
bump()
bump()
print(peek())
adders = [lambda x, n=n: x + n for n in range(3)]
print([add(10) for add in adders])
"#);
    assert_eq!(output, "2\n[10, 11, 12]\n");
}

#[test]
fn globals_are_rebound_from_functions() {
    let output = run(r#"
total = 0
def add(n):
    global total
    total += n
add(3)
add(4)
print(total)
"#);
    assert_eq!(output, "7\n");
}

#[test]
fn unbound_locals_are_reported() {
    let message = run_error(r#"
x = 1
def f():
    print(x)
    x = 2
f()
"#);
    assert_eq!(
        message,
        "UnboundLocalError: cannot access local variable 'x' where it is not associated with a value"
    );
}

#[test]
fn arguments_bind_by_position_keyword_and_star() {
    let output = run(r#"
def f(a, b=2, *args, c, d=4, **kwargs):
    return (a, b, args, c, d, sorted(kwargs.items()))
print(f(1, c=3))
print(f(1, 5, 6, 7, c=3, e=8, d=9))
print(f(*[1, 2], **{"c": 0}))
"#);
    assert_eq!(
        output,
        "(1, 2, (), 3, 4, [])\n(1, 5, (6, 7), 3, 9, [('e', 8)])\n(1, 2, (), 0, 4, [])\n"
    );
}

#[test]
fn classes_and_super() {
    let output = run(r#"
class Base:
    kind = "base"
    def __init__(self, name):
        self.name = name
    def describe(self):
        return f"{self.kind}:{self.name}"

class Child(Base):
    kind = "child"
    def __init__(self, name, extra):
        super().__init__(name)
        self.extra = extra
    def describe(self):
        return super().describe() + "+" + str(self.extra)

c = Child("c", 3)
print(c.describe())
print(isinstance(c, Base), issubclass(Child, Base), type(c).__name__)
"#);
    assert_eq!(output, "child:c+3\nTrue True Child\n");
}

#[test]
fn properties_and_static_methods() {
    let output = run(r#"
class Temperature:
    def __init__(self):
        self._celsius = 0
    @property
    def celsius(self):
        return self._celsius
    @celsius.setter
    def celsius(self, value):
        self._celsius = value
    @staticmethod
    def scale():
        return "C"
    @classmethod
    def name(cls):
        return cls.__name__

t = Temperature()
t.celsius = 21
print(t.celsius, Temperature.scale(), t.name())
"#);
    assert_eq!(output, "21 C Temperature\n");
}

#[test]
fn operator_overloading() {
    let output = run(r#"
class Vec:
    def __init__(self, x, y):
        self.x, self.y = x, y
    def __add__(self, other):
        return Vec(self.x + other.x, self.y + other.y)
    def __eq__(self, other):
        return self.x == other.x and self.y == other.y
    def __repr__(self):
        return f"Vec({self.x}, {self.y})"
    def __len__(self):
        return 2
v = Vec(1, 2) + Vec(3, 4)
print(v, v == Vec(4, 6), len(v), [v])
"#);
    assert_eq!(output, "Vec(4, 6) True 2 [Vec(4, 6)]\n");
}

#[test]
fn try_except_else_finally() {
    let output = run(r#"
def attempt(value):
    try:
        result = 10 // value
    except ZeroDivisionError as e:
        print("caught", type(e).__name__)
        return "failed"
    else:
        print("ok", result)
        return "done"
    finally:
        print("cleanup")
print(attempt(2))
print(attempt(0))
try:
    raise KeyError("k")
except (ValueError, LookupError) as e:
    print(repr(e), e.args)
"#);
    assert_eq!(
        output,
        "ok 5\ncleanup\ndone\ncaught ZeroDivisionError\ncleanup\nfailed\nKeyError('k') ('k',)\n"
    );
}

#[test]
fn exception_context_and_cause() {
    let output = run(r#"
try:
    try:
        {}["missing"]
    except KeyError:
        raise ValueError("bad")
except ValueError as e:
    print(type(e.__context__).__name__, e.__cause__)
try:
    raise RuntimeError("outer") from TypeError("inner")
except RuntimeError as e:
    print(e.__cause__)
"#);
    assert_eq!(output, "KeyError None\ninner\n");
}

#[test]
fn uncaught_exceptions_surface_as_errors() {
    assert_eq!(run_error("raise ValueError('boom')\n"), "ValueError: boom");
    assert_eq!(run_error("undefined_name\n"), "NameError: name 'undefined_name' is not defined");
    assert_eq!(run_error("assert 1 == 2, 'math'\n"), "AssertionError: math");
    assert_eq!(run_error("raise\n"), "RuntimeError: No active exception to reraise");
}

#[test]
fn with_statements_enter_and_exit() {
    let output = run(r#"
class Manager:
    def __init__(self, suppress):
        self.suppress = suppress
    def __enter__(self):
        print("enter")
        return self
    def __exit__(self, typ, value, tb):
        print("exit", typ.__name__ if typ else None)
        return self.suppress

with Manager(False) as m:
    print("body", m.suppress)
with Manager(True):
    raise ValueError
print("after")
"#);
    assert_eq!(
        output,
        "enter\nbody False\nexit None\nenter\nexit ValueError\nafter\n"
    );
}

#[test]
fn loops_with_else_break_and_continue() {
    let output = run(r#"
for n in range(2, 10):
    for d in range(2, n):
        if n % d == 0:
            break
    else:
        print(n, end=" ")
print()
i = 0
while i < 5:
    i += 1
    if i % 2:
        continue
    print(i, end=",")
else:
    print("done")
"#);
    assert_eq!(output, "2 3 5 7 \n2,4,done\n");
}

#[test]
fn comprehensions_have_their_own_scope() {
    let output = run(r#"
x = "outer"
squares = [x * x for x in range(5) if x % 2 == 0]
pairs = {k: v for k, v in zip("abc", range(3))}
unique = {c for c in "hello"}
print(squares, pairs, sorted(unique), x)
print(sum(n * n for n in range(4)))
print([(i, j) for i in range(3) for j in range(i)])
"#);
    assert_eq!(
        output,
        "[0, 4, 16] {'a': 0, 'b': 1, 'c': 2} ['e', 'h', 'l', 'o'] outer\n14\n[(1, 0), (2, 0), (2, 1)]\n"
    );
}

#[test]
fn builtin_collections() {
    let output = run(r#"
items = [3, 1, 2]
items.append(0)
items.sort()
print(items)
print(items.pop(), items.index(2), items)
d = dict(a=1)
d.update({"b": 2})
d.setdefault("c", 3)
print(d, d.get("z", "none"), list(d.keys()))
print(d.pop("a"), d)
s = {1, 2}
s.add(3)
s.discard(1)
print(sorted(s), 2 in s, s | {9} == {2, 3, 9})
t = (1, 2, 2)
print(t.count(2), t[1:], t[::-1], "abc"[-1])
print(list(enumerate("ab", 1)), list(reversed([1, 2, 3])))
print(min([4, 2, 8]), max(3, 9, key=lambda v: -v), abs(-2.5))
"#);
    assert_eq!(
        output,
        "[0, 1, 2, 3]\n\
3 2 [0, 1, 2]\n\
{'a': 1, 'b': 2, 'c': 3} none ['a', 'b', 'c']\n\
1 {'b': 2, 'c': 3}\n\
[2, 3] True True\n\
2 (2, 2) (2, 2, 1) c\n\
[(1, 'a'), (2, 'b')] [3, 2, 1]\n\
2 3 2.5\n"
    );
}

#[test]
fn strings_and_formatting() {
    let output = run(r#"
name = "arbor"
print(f"{name!r:>9}|{3.14159:.2f}|{255:#x}|{7:03d}")
print("%s has %d chars" % (name, len(name)))
print("{0}-{1}-{0}".format("a", "b"), ", ".join(["x", "y"]))
print(" pad ".strip(), "a,b".split(","), name.upper(), name.startswith(("ar", "zz")))
print(int("42") + 1, float("1.5"), str(10), repr("q'uote"))
"#);
    assert_eq!(
        output,
        "  'arbor'|3.14|0xff|007\narbor has 5 chars\na-b-a x, y\npad ['a', 'b'] ARBOR True\n43 1.5 10 \"q'uote\"\n"
    );
}

#[test]
fn integers_are_arbitrary_precision() {
    let output = run(r#"
print(2 ** 100)
print(-7 // 2, -7 % 2, 7 / 2, divmod(17, 5))
print(True + True, 10 ** -1)
"#);
    assert_eq!(
        output,
        "1267650600228229401496703205376\n-4 1 3.5 (3, 2)\n2 0.1\n"
    );
}

#[test]
fn imports_load_registered_modules() {
    let output = run_with(
        r#"
import helpers
from helpers import double as twice
from pkg.inner import VALUE
import pkg.inner
print(helpers.double(4), twice(5), VALUE, pkg.inner.VALUE)
"#,
        &[
            ("helpers", "def double(x):\n    return x * 2\n"),
            ("pkg", ""),
            ("pkg.inner", "VALUE = 'inner'\n"),
        ],
    );
    assert_eq!(output, "8 10 inner inner\n");
}

#[test]
fn missing_modules_raise_import_error() {
    let message = run_error("import nowhere\n");
    assert!(message.starts_with("ImportError"), "{message}");
}

#[test]
fn deleting_names_and_items() {
    let output = run(r#"
a = 1
items = [1, 2, 3]
del a, items[0]
print(items)
"#);
    assert_eq!(output, "[2, 3]\n");
    let message = run_error("x = 1\ndel x\nprint(x)\n");
    assert_eq!(message, "NameError: name 'x' is not defined");
}

#[test]
fn recursion_is_limited() {
    let message = run_error("def f(n):\n    return f(n + 1)\nf(0)\n");
    assert_eq!(message, "RecursionError: maximum recursion depth exceeded");
}

#[test]
fn optimized_runs_strip_asserts() {
    use arbor_vm::{Interpreter, Settings};
    let settings = Settings {
        optimize: 1,
        capture_output: true,
        ..Settings::default()
    };
    let output = Interpreter::new(settings).enter(|vm| {
        vm.run_source("assert False\nprint('skipped')\n", "<test>").unwrap();
        vm.take_output()
    });
    assert_eq!(output, "skipped\n");
}
