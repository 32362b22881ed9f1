/// Lifecycle of one cache key.
///
/// ```text
/// Idle ──request──▶ Loading ──ok──▶ Success
///                      │
///                      └──err──▶ Error
/// ```
///
/// A refetch moves `Success`/`Error` back to `Loading`. With
/// stale-while-revalidate enabled, a refetch of `Success` keeps the data
/// and sets `refreshing` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState<T, E> {
    Idle,
    Loading,
    Success { data: T, refreshing: bool },
    Error(E),
}

impl<T, E> QueryState<T, E> {
    /// True while an operation for this key is expected to settle.
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            Self::Loading
                | Self::Success {
                    refreshing: true,
                    ..
                }
        )
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Error(_)
                | Self::Success {
                    refreshing: false,
                    ..
                }
        )
    }
}

/// Snapshot handed to a presentation layer.
///
/// Exactly one of `is_loading`, `error` and `data` is set, except during a
/// stale-while-revalidate refresh where `data` coexists with `is_loading`.
/// `Idle` renders as loading: a view only sees it before its first request
/// goes out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderState<T, E> {
    pub is_loading: bool,
    pub error: Option<E>,
    pub data: Option<T>,
}

impl<T: Clone, E: Clone> From<&QueryState<T, E>> for RenderState<T, E> {
    fn from(state: &QueryState<T, E>) -> Self {
        match state {
            QueryState::Idle | QueryState::Loading => Self {
                is_loading: true,
                error: None,
                data: None,
            },
            QueryState::Success { data, refreshing } => Self {
                is_loading: *refreshing,
                error: None,
                data: Some(data.clone()),
            },
            QueryState::Error(error) => Self {
                is_loading: false,
                error: Some(error.clone()),
                data: None,
            },
        }
    }
}
