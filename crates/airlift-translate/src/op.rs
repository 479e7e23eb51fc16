//! Deferred builder computations.
//!
//! An [`Op<E, T>`] is a build step that has not run yet: a single-shot
//! closure from a builder environment `E` to `Result<T>`. Prologue and
//! epilogue fragments are assembled as `Op` chains while the signature is
//! still being planned, then built once the translator environment
//! exists.
//!
//! `build` consumes the value, so the single-use invariant is enforced by
//! move semantics rather than a runtime flag. All composition is
//! synchronous and single-threaded.

use crate::TranslateError;

pub struct Op<'a, E, T> {
    run: Box<dyn FnOnce(&mut E) -> Result<T, TranslateError> + 'a>,
}

impl<'a, E, T: 'a> Op<'a, E, T> {
    pub fn new(run: impl FnOnce(&mut E) -> Result<T, TranslateError> + 'a) -> Self {
        Op { run: Box::new(run) }
    }

    /// Yields `value` without touching the environment.
    pub fn pure(value: T) -> Self {
        Op::new(move |_| Ok(value))
    }

    pub fn fail(error: TranslateError) -> Self {
        Op::new(move |_| Err(error))
    }

    /// Runs the computation. Consumes `self`: an `Op` builds exactly once.
    pub fn build(self, env: &mut E) -> Result<T, TranslateError> {
        (self.run)(env)
    }

    pub fn map<U: 'a>(self, f: impl FnOnce(T) -> U + 'a) -> Op<'a, E, U>
    where
        E: 'a,
    {
        Op::new(move |env| self.build(env).map(f))
    }

    pub fn bind<U: 'a>(self, f: impl FnOnce(T) -> Op<'a, E, U> + 'a) -> Op<'a, E, U>
    where
        E: 'a,
    {
        Op::new(move |env| {
            let value = self.build(env)?;
            f(value).build(env)
        })
    }

    /// Sequences two computations, keeping the second result.
    pub fn then<U: 'a>(self, next: Op<'a, E, U>) -> Op<'a, E, U>
    where
        E: 'a,
    {
        Op::new(move |env| {
            self.build(env)?;
            next.build(env)
        })
    }

    /// Runs an op written against a projected environment `E2` under the
    /// broader environment `E`.
    pub fn embed<E2: 'a>(op: Op<'a, E2, T>) -> Self
    where
        E: ProjectEnv<E2> + 'a,
    {
        Op::new(move |env: &mut E| op.build(env.project()))
    }
}

impl<'a, E: 'a> Op<'a, E, ()> {
    /// The no-op effect.
    pub fn nop() -> Self {
        Op::pure(())
    }
}

/// Lossless projection from a broader to a narrower builder environment,
/// the `environment_cast` of the combinator layer.
pub trait ProjectEnv<E2> {
    fn project(&mut self) -> &mut E2;
}

impl<E> ProjectEnv<E> for E {
    fn project(&mut self) -> &mut E {
        self
    }
}

pub fn get_env<'a, E: 'a, T: 'a>(read: impl FnOnce(&mut E) -> T + 'a) -> Op<'a, E, T> {
    Op::new(move |env| Ok(read(env)))
}

pub fn lift2<'a, E: 'a, A: 'a, B: 'a, R: 'a>(
    a: Op<'a, E, A>,
    b: Op<'a, E, B>,
    f: impl FnOnce(A, B) -> R + 'a,
) -> Op<'a, E, R> {
    a.bind(move |a| b.map(move |b| f(a, b)))
}

pub fn lift3<'a, E: 'a, A: 'a, B: 'a, C: 'a, R: 'a>(
    a: Op<'a, E, A>,
    b: Op<'a, E, B>,
    c: Op<'a, E, C>,
    f: impl FnOnce(A, B, C) -> R + 'a,
) -> Op<'a, E, R> {
    a.bind(move |a| b.bind(move |b| c.map(move |c| f(a, b, c))))
}

pub fn lift4<'a, E: 'a, A: 'a, B: 'a, C: 'a, D: 'a, R: 'a>(
    a: Op<'a, E, A>,
    b: Op<'a, E, B>,
    c: Op<'a, E, C>,
    d: Op<'a, E, D>,
    f: impl FnOnce(A, B, C, D) -> R + 'a,
) -> Op<'a, E, R> {
    a.bind(move |a| b.bind(move |b| c.bind(move |c| d.map(move |d| f(a, b, c, d)))))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        value: u32,
    }

    fn increment() -> Op<'static, Counter, u32> {
        Op::new(|env: &mut Counter| {
            env.value += 1;
            Ok(env.value)
        })
    }

    #[test]
    fn bind_sequences_effects_in_order() {
        let mut env = Counter { value: 0 };
        let op = increment().bind(|first| increment().map(move |second| (first, second)));
        assert_eq!(op.build(&mut env).unwrap(), (1, 2));
        assert_eq!(env.value, 2);
    }

    #[test]
    fn errors_short_circuit_the_chain() {
        let mut env = Counter { value: 0 };
        let op = increment()
            .then(Op::<'_, Counter, u32>::fail(TranslateError::Unsupported("nope".to_string())))
            .then(increment());
        let err = op.build(&mut env).unwrap_err();
        assert!(matches!(err, TranslateError::Unsupported(_)));
        // The first effect ran, the one after the failure did not.
        assert_eq!(env.value, 1);
    }

    #[test]
    fn lifts_combine_left_to_right() {
        let mut env = Counter { value: 0 };
        let op = lift3(increment(), increment(), increment(), |a, b, c| [a, b, c]);
        assert_eq!(op.build(&mut env).unwrap(), [1, 2, 3]);
    }

    struct Wide {
        counter: Counter,
    }

    impl ProjectEnv<Counter> for Wide {
        fn project(&mut self) -> &mut Counter {
            &mut self.counter
        }
    }

    #[test]
    fn environment_projection_runs_narrow_ops() {
        let mut env = Wide { counter: Counter { value: 10 } };
        let narrow = increment();
        let wide: Op<'_, Wide, u32> = Op::embed(narrow);
        assert_eq!(wide.build(&mut env).unwrap(), 11);
    }
}
