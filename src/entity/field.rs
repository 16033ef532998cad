/// Change-tracking slot for a single attribute.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Field<T> {
    /// Value as last synchronised with storage.
    Unchanged(T),
    /// Value assigned since the last synchronisation.
    Set(T),
}

impl<T> Field<T> {
    pub fn value_ref(&self) -> &T {
        match self {
            Field::Unchanged(v) => v,
            Field::Set(v) => v,
        }
    }

    pub fn value(self) -> T {
        match self {
            Field::Unchanged(v) => v,
            Field::Set(v) => v,
        }
    }

    pub fn changed_ref(&self) -> Option<&T> {
        match self {
            Field::Unchanged(_) => None,
            Field::Set(v) => Some(v),
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, Field::Set(_))
    }

    /// Set the value of the field.
    pub fn set(&mut self, value: T) {
        match self {
            Field::Unchanged(_) => *self = Field::Set(value),
            Field::Set(v) => *v = value,
        }
    }

    /// Forget the change: the current value becomes the synchronised one.
    pub fn sync(&mut self) {
        if let Field::Set(_) = self {
            replace_with::replace_with_or_abort(self, |o| Field::Unchanged(o.value()));
        }
    }
}

impl<T> Field<T>
where
    T: PartialEq,
{
    /// Like [`Field::set`] but leaves an unchanged field untouched when the
    /// new value equals the stored one.
    pub fn assign(&mut self, value: T) {
        match self {
            Field::Unchanged(v) if *v == value => {}
            _ => self.set(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_equal_value_keeps_field_clean() {
        let mut f = Field::Unchanged(3);
        f.assign(3);
        assert!(!f.is_changed());
        f.assign(4);
        assert_eq!(f.changed_ref(), Some(&4));
    }

    #[test]
    fn set_then_sync() {
        let mut f = Field::Unchanged("a".to_string());
        f.set("ab".to_string());
        assert!(f.is_changed());
        assert_eq!(f.value_ref(), "ab");

        f.sync();
        assert!(!f.is_changed());
        assert_eq!(f, Field::Unchanged("ab".to_string()));
    }
}
