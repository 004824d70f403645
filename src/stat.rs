use crate::group::MetricGroup;
use std::sync::Arc;

/// The recording surface handed to application code.
///
/// Call sites depend on this trait rather than on a concrete group, so they never need to know
/// which instruments back a role.  The first label value of every call is `name`; `extra` fills
/// the remaining label positions in declaration order.
pub trait Stat: Send + Sync {
    /// Records a duration, usually in microseconds.
    fn timing(&self, name: &str, time: i64, extra: &[&str]);

    /// Counts one occurrence.
    fn incr(&self, name: &str, extra: &[&str]);

    /// Sets the current state to `value`.
    fn state(&self, name: &str, value: i64, extra: &[&str]);
}

impl Stat for MetricGroup {
    fn timing(&self, name: &str, time: i64, extra: &[&str]) { MetricGroup::timing(self, name, time, extra) }

    fn incr(&self, name: &str, extra: &[&str]) { MetricGroup::incr(self, name, extra) }

    fn state(&self, name: &str, value: i64, extra: &[&str]) { MetricGroup::state(self, name, value, extra) }
}

impl<S: Stat + ?Sized> Stat for Arc<S> {
    fn timing(&self, name: &str, time: i64, extra: &[&str]) { (**self).timing(name, time, extra) }

    fn incr(&self, name: &str, extra: &[&str]) { (**self).incr(name, extra) }

    fn state(&self, name: &str, value: i64, extra: &[&str]) { (**self).state(name, value, extra) }
}

impl<'a, S: Stat + ?Sized> Stat for &'a S {
    fn timing(&self, name: &str, time: i64, extra: &[&str]) { (**self).timing(name, time, extra) }

    fn incr(&self, name: &str, extra: &[&str]) { (**self).incr(name, extra) }

    fn state(&self, name: &str, value: i64, extra: &[&str]) { (**self).state(name, value, extra) }
}

/// An unset group records nothing.
impl<S: Stat> Stat for Option<S> {
    fn timing(&self, name: &str, time: i64, extra: &[&str]) {
        if let Some(stat) = self {
            stat.timing(name, time, extra);
        }
    }

    fn incr(&self, name: &str, extra: &[&str]) {
        if let Some(stat) = self {
            stat.incr(name, extra);
        }
    }

    fn state(&self, name: &str, value: i64, extra: &[&str]) {
        if let Some(stat) = self {
            stat.state(name, value, extra);
        }
    }
}
