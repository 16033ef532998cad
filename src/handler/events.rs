use crate::entity::Record;
use crate::event::{Channel, EventDispatcher, EventKind, Response};
use crate::settings::Settings;

/// What a model event produced.
#[derive(Debug, PartialEq)]
pub(crate) enum Fired {
    Vetoed,
    Answered(Vec<Response>),
    Silent,
}

impl Fired {
    pub(crate) fn is_vetoed(&self) -> bool {
        matches!(self, Fired::Vetoed)
    }
}

/// The custom event goes first; a veto or any answer from it is final.
/// Otherwise the conventional channel fires, if it is listened.
pub(crate) fn fire_model_event(
    settings: &Settings,
    record: &mut Record,
    kind: EventKind,
    halt: bool,
) -> Fired {
    let dispatcher = settings.dispatcher();

    if let Some(channel) = settings.custom_event(kind) {
        match fire(dispatcher, channel, record, halt) {
            Fired::Silent => {}
            conclusive => return conclusive,
        }
    }

    if !settings.listens_generic(kind) {
        return Fired::Silent;
    }

    fire(dispatcher, &settings.model_channel(kind), record, halt)
}

/// Fires `kind` when anything listens, reporting whether it was vetoed.
pub(crate) fn gate(settings: &Settings, record: &mut Record, kind: EventKind) -> bool {
    settings.dispatchable(kind) && fire_model_event(settings, record, kind, true).is_vetoed()
}

/// Fires `kind` without halting when anything listens.
pub(crate) fn notify(settings: &Settings, record: &mut Record, kind: EventKind) {
    if !settings.dispatchable(kind) {
        return;
    }
    if let Fired::Answered(responses) = fire_model_event(settings, record, kind, false) {
        tracing::trace!(event = %kind, answers = responses.len(), "listeners answered");
    }
}

fn fire(dispatcher: &dyn EventDispatcher, channel: &Channel, record: &mut Record, halt: bool) -> Fired {
    if halt {
        return match dispatcher.until(channel, record) {
            Some(Response::Veto) => Fired::Vetoed,
            Some(response) => Fired::Answered(vec![response]),
            None => Fired::Silent,
        };
    }

    let responses = dispatcher.dispatch(channel, record);
    if responses.is_empty() {
        Fired::Silent
    } else {
        Fired::Answered(responses)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::Connection;
    use crate::entity::EntityType;
    use crate::event::EventBus;
    use crate::handler::BatchContext;
    use crate::value::Value;

    fn settings(events: &EventBus) -> Settings {
        let car = EntityType::new("car", "cars").custom_event(EventKind::Saving, "CarSaving");
        let ctx = BatchContext::single(
            Connection::from_backend(Arc::new(MemoryStore::new("sqlite"))),
            Arc::new(events.clone()),
        );
        Settings::resolve(&car, &ctx).unwrap()
    }

    fn counter(events: &EventBus, channel: Channel, answer: Option<Response>) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        events.listen(channel, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            answer.clone()
        });
        calls
    }

    #[test]
    fn custom_veto_stops_the_generic_channel() {
        let events = EventBus::new();
        let custom = counter(&events, Channel::custom("CarSaving"), Some(Response::Veto));
        let generic = counter(&events, Channel::model("car", EventKind::Saving), None);
        let settings = settings(&events);

        let mut record = Record::named("car");
        assert!(gate(&settings, &mut record, EventKind::Saving));
        assert_eq!(custom.load(Ordering::SeqCst), 1);
        assert_eq!(generic.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn custom_answer_is_final() {
        let events = EventBus::new();
        counter(&events, Channel::custom("CarSaving"), Some(Response::Value(Value::from("ok"))));
        let generic = counter(&events, Channel::model("car", EventKind::Saving), Some(Response::Veto));
        let settings = settings(&events);

        let mut record = Record::named("car");
        let fired = fire_model_event(&settings, &mut record, EventKind::Saving, true);
        assert_eq!(fired, Fired::Answered(vec![Response::Value(Value::from("ok"))]));
        assert_eq!(generic.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn silent_custom_falls_through() {
        let events = EventBus::new();
        let custom = counter(&events, Channel::custom("CarSaving"), None);
        let generic = counter(&events, Channel::model("car", EventKind::Saving), Some(Response::Veto));
        let settings = settings(&events);

        let mut record = Record::named("car");
        assert!(gate(&settings, &mut record, EventKind::Saving));
        assert_eq!(custom.load(Ordering::SeqCst), 1);
        assert_eq!(generic.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unlistened_kinds_do_not_fire() {
        let events = EventBus::new();
        let settings = settings(&events);
        let mut record = Record::named("car");
        assert!(!gate(&settings, &mut record, EventKind::Creating));
        assert_eq!(
            fire_model_event(&settings, &mut record, EventKind::Created, false),
            Fired::Silent
        );
    }
}
