//! Input and context validation. Fails fast with non-retryable errors.

use async_trait::async_trait;

use super::{BeforeOutcome, Invocation, Middleware};
use crate::error::{DispatchError, DispatchResult};

pub struct ValidationMiddleware {
    max_input_chars: usize,
    required_context: Vec<String>,
}

impl ValidationMiddleware {
    pub fn new(max_input_chars: usize, required_context: Vec<String>) -> Self {
        Self {
            max_input_chars,
            required_context,
        }
    }
}

#[async_trait]
impl Middleware for ValidationMiddleware {
    fn name(&self) -> &str {
        "validation"
    }

    fn priority(&self) -> i32 {
        10
    }

    async fn before(&self, invocation: &mut Invocation) -> DispatchResult<BeforeOutcome> {
        let input = &invocation.task.input;
        if input.trim().is_empty() {
            return Err(DispatchError::validation("input is empty"));
        }
        let chars = input.chars().count();
        if chars > self.max_input_chars {
            return Err(DispatchError::validation(format!(
                "input is {chars} characters, limit is {}",
                self.max_input_chars
            )));
        }
        let missing: Vec<&str> = self
            .required_context
            .iter()
            .filter(|field| invocation.task.context.field(field).is_none())
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(DispatchError::validation(format!(
                "missing required context: {}",
                missing.join(", ")
            )));
        }
        Ok(BeforeOutcome::Continue)
    }
}
