use crate::jobs::model::TransformKind;

/// Credit cost per transformation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pricing {
    pub restore: i64,
    pub animate: i64,
    pub compose: i64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            restore: 1,
            animate: 5,
            compose: 3,
        }
    }
}

impl Pricing {
    pub fn cost_for(&self, kind: TransformKind) -> i64 {
        match kind {
            TransformKind::Restore => self.restore,
            TransformKind::Animate => self.animate,
            TransformKind::Compose => self.compose,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.restore > 0 && self.animate > 0 && self.compose > 0
    }
}
