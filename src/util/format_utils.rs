use std::{cell::Cell, fmt::Display};

/// Displays every item of an iterator with `fun`, putting `separator` between them.
///
/// The iterator is consumed by the first `fmt` call, formatting the value twice prints nothing.
pub struct IterDisplay<
    T: IntoIterator,
    F: Fn(T::Item, &mut std::fmt::Formatter<'_>) -> std::fmt::Result,
> {
    iter: Cell<Option<T>>,
    separator: &'static str,
    fun: F,
}

impl<T: IntoIterator, F: Fn(T::Item, &mut std::fmt::Formatter<'_>) -> std::fmt::Result>
    IterDisplay<T, F>
{
    pub fn new(iter: T, separator: &'static str, fun: F) -> Self {
        Self {
            iter: Cell::new(Some(iter)),
            separator,
            fun,
        }
    }
}

impl<T: IntoIterator, F: Fn(T::Item, &mut std::fmt::Formatter<'_>) -> std::fmt::Result> Display
    for IterDisplay<T, F>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(iter) = self.iter.replace(None) else {
            return Ok(());
        };
        let mut first = true;
        for i in iter {
            if !first {
                f.write_str(self.separator)?;
            }
            (self.fun)(i, f)?;
            first = false;
        }
        Ok(())
    }
}

/// Adapts a closure into something `Display`able, used to build nested output lazily.
pub struct Fun<F: FnOnce(&mut std::fmt::Formatter<'_>) -> std::fmt::Result>(Cell<Option<F>>);

impl<F: FnOnce(&mut std::fmt::Formatter<'_>) -> std::fmt::Result> Fun<F> {
    pub fn new(fun: F) -> Self {
        Self(Cell::new(Some(fun)))
    }
}

impl<F: FnOnce(&mut std::fmt::Formatter<'_>) -> std::fmt::Result> Display for Fun<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.replace(None) {
            Some(fun) => fun(f),
            None => Ok(()),
        }
    }
}

#[test]
fn test_iter_display() {
    let display = IterDisplay::new([1, 2, 3], ", ", |i, f| write!(f, "#{i}"));
    assert_eq!(display.to_string(), "#1, #2, #3");
    // consumed
    assert_eq!(display.to_string(), "");

    let fun = Fun::new(|f| write!(f, "pass {}", 4));
    assert_eq!(format!("[{fun}]"), "[pass 4]");
}
