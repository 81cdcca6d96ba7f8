//! Group/consumer name derivation, per spec.md §3 "Consumer identity".
//!
//! `group_name` is shared by every instance of an application for a
//! load-balancing (`unique=false`) listener, or instance-qualified for a
//! fan-out (`unique=true`) one; `consumer_name` is always unique per
//! running instance, regardless of `unique`.

/// Default segment separator. Overridable via `EVENT_BUS_KEY_SEPARATOR`
/// (spec.md §6).
pub const DEFAULT_KEY_SEPARATOR: &str = ":";

/// Discriminates a Bus Listener from a Handler Group in derived names, so
/// the two can share a `name` on the same stream without colliding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerClass {
    Bus,
    Group,
}

impl ListenerClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ListenerClass::Bus => "bus",
            ListenerClass::Group => "group",
        }
    }
}

/// `group_name = join(stream, application_name, class, name, …)`.
pub fn group_name(
    separator: &str,
    stream: &str,
    application_name: &str,
    class: ListenerClass,
    name: &str,
    unique: bool,
    instance: &str,
) -> String {
    let mut parts = vec![stream, application_name, class.as_str(), name];
    if unique {
        parts.push(instance);
    }
    parts.join(separator)
}

/// `consumer_name = join(stream, application_name_with_instance, class, name)`.
pub fn consumer_name(
    separator: &str,
    stream: &str,
    application_name: &str,
    instance: &str,
    class: ListenerClass,
    name: &str,
) -> String {
    let application_name_with_instance = format!("{application_name}{separator}{instance}");
    [stream, application_name_with_instance.as_str(), class.as_str(), name].join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_listener_instance_qualifies_group_name() {
        let shared = group_name(":", "EVENTS", "svc", ListenerClass::Bus, "handlers", false, "inst-1");
        let fanned_out = group_name(":", "EVENTS", "svc", ListenerClass::Bus, "handlers", true, "inst-1");
        assert_eq!(shared, "EVENTS:svc:bus:handlers");
        assert_eq!(fanned_out, "EVENTS:svc:bus:handlers:inst-1");
    }

    #[test]
    fn consumer_name_always_includes_instance() {
        let a = consumer_name(":", "EVENTS", "svc", "inst-1", ListenerClass::Group, "close");
        let b = consumer_name(":", "EVENTS", "svc", "inst-2", ListenerClass::Group, "close");
        assert_ne!(a, b);
        assert_eq!(a, "EVENTS:svc:inst-1:group:close");
    }
}
