//! Per-task page history.

/// One visited page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFrame {
    pub url: String,
    pub content: String,
}

/// Navigation stack owned by exactly one sandbox.
#[derive(Debug, Default)]
pub struct PageStack {
    frames: Vec<PageFrame>,
}

impl PageStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: PageFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<PageFrame> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&PageFrame> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Resolve `relative` against the top frame's URL. Returned unchanged when
    /// the stack is empty or the join fails.
    pub fn resolve(&self, relative: &str) -> String {
        let Some(top) = self.top() else {
            return relative.to_string();
        };
        url::Url::parse(&top.url)
            .and_then(|base| base.join(relative.trim()))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| relative.to_string())
    }
}
