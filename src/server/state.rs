use crate::layout::ProjectLayout;

pub struct AppState {
    pub layout: ProjectLayout,
}

impl AppState {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }
}
