/// The entity was never allocated, has been despawned, or the handle's generation is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("no such entity")]
pub struct NoSuchEntity;

/// Errors that can occur when accessing a single component of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ComponentError {
    #[error("no such entity")]
    NoSuchEntity,

    #[error("missing {0} component")]
    MissingComponent(&'static str),
}

impl ComponentError {
    pub(crate) fn missing<T: 'static>() -> Self {
        ComponentError::MissingComponent(std::any::type_name::<T>())
    }
}

/// A column could not be borrowed in the requested mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BorrowConflict {
    /// Shared access was requested while the column is borrowed exclusively.
    #[error("{0} already borrowed uniquely")]
    Shared(&'static str),

    /// Exclusive access was requested while the column is borrowed.
    #[error("{0} already borrowed")]
    Exclusive(&'static str),
}

impl From<NoSuchEntity> for ComponentError {
    fn from(_: NoSuchEntity) -> Self {
        ComponentError::NoSuchEntity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_names_the_type() {
        let err = ComponentError::missing::<u32>();
        assert_eq!(err, ComponentError::MissingComponent("u32"));
        assert_eq!(err.to_string(), "missing u32 component");
    }

    #[test]
    fn borrow_conflict_messages() {
        assert_eq!(
            BorrowConflict::Shared("u32").to_string(),
            "u32 already borrowed uniquely"
        );
        assert_eq!(BorrowConflict::Exclusive("u32").to_string(), "u32 already borrowed");
    }

    #[test]
    fn no_such_entity_converts() {
        let err: ComponentError = NoSuchEntity.into();
        assert_eq!(err, ComponentError::NoSuchEntity);
    }
}
