use std::sync::Mutex;

/// Named screens of the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    Register,
    Home,
}

/// Moves between screens. Implemented by whatever hosts the UI.
pub trait Navigator: Send + Sync {
    fn navigate(&self, screen: Screen);

    fn go_back(&self);
}

/// History stack of visited screens.
#[derive(Debug)]
pub struct NavigationStack {
    history: Mutex<Vec<Screen>>,
}

impl NavigationStack {
    pub fn new(initial: Screen) -> Self {
        Self {
            history: Mutex::new(vec![initial]),
        }
    }

    pub fn current(&self) -> Screen {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        // the initial screen is never popped
        history.last().copied().unwrap_or(Screen::Login)
    }

    pub fn history(&self) -> Vec<Screen> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Navigator for NavigationStack {
    fn navigate(&self, screen: Screen) {
        tracing::debug!(?screen, "navigate");
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push(screen);
    }

    fn go_back(&self) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() > 1 {
            history.pop();
        }
    }
}
