use std::fmt;

macro_rules! err {
    ($msg:literal) => {
        DexError::new($msg)
    };
    ($fmtstr:literal, $($args:tt)*) => {
        DexError::new(&format!($fmtstr, $($args)*))
    };
}

#[macro_export]
macro_rules! fail {
    ($msg:literal) => {
        return Err(DexError::new($msg).into())
    };
    ($fmtstr:literal, $($args:tt)*) => {
        return Err(DexError::new(&format!($fmtstr, $($args)*)).into())
    };
}

/// Structural failure while reading a DEX or class file.
///
/// Contexts are pushed innermost first and render as `msg for a of b`.
#[derive(Debug, PartialEq, Eq)]
pub struct DexError
{
    msg: String,
    contexts: Vec<String>,
}

impl DexError
{
    pub(crate) fn new(msg: &str) -> Self
    {
        DexError {
            msg: msg.to_string(),
            contexts: Vec::new(),
        }
    }

    pub(crate) fn context(mut self, context: impl Into<String>) -> Self
    {
        self.contexts.push(context.into());
        self
    }

    pub fn message(&self) -> &str
    {
        &self.msg
    }
}

impl fmt::Display for DexError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.msg)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for DexError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_chain()
    {
        let e = err!("Unexpected end of stream reading u4 at index {}", 12)
            .context("method_ids[3]")
            .context("classes.dex");
        assert_eq!(e.to_string(), "Unexpected end of stream reading u4 at index 12 for method_ids[3] of classes.dex");
        assert_eq!(e.message(), "Unexpected end of stream reading u4 at index 12");
    }
}
