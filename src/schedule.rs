//! Talk schedule download and parsing.
//!
//! The schedule is a Pentabarf-style XML document (`schedule/day/room/event`).
//! It is flattened into an id keyed map in a single pass and published as an
//! immutable [`ScheduleSnapshot`]; a refresh replaces the whole snapshot.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use reqwest::blocking::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub id: Option<String>,
    pub name: String,
}

/// One scheduled talk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Event {
    pub id: u64,
    pub title: String,
    pub subtitle: String,
    pub abstract_text: String,
    pub description: String,
    pub track: String,
    pub room: String,
    pub persons: Vec<Person>,
}

impl Event {
    /// Presenter names in schedule order, joined with `", "`.
    pub fn speaker_names(&self) -> String {
        self.persons
            .iter()
            .map(|person| person.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The description, or the abstract when the description is empty.
    pub fn summary(&self) -> &str {
        if self.description.is_empty() {
            &self.abstract_text
        } else {
            &self.description
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleSnapshot {
    conference: Option<String>,
    events: HashMap<u64, Event>,
    fetched_at: Option<Instant>,
    fetched_wall: Option<DateTime<Local>>,
}

impl ScheduleSnapshot {
    /// The snapshot held before the first successful download.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn parse(xml: &str, fetched_at: Instant) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml).context("parse schedule xml")?;
        let root = doc.root_element();
        let conference = root
            .children()
            .find(|n| n.has_tag_name("conference"))
            .and_then(|n| child_text(n, "title"))
            .filter(|title| !title.is_empty());

        let mut events = HashMap::new();
        for day in root.descendants().filter(|n| n.has_tag_name("day")) {
            for room in day.children().filter(|n| n.has_tag_name("room")) {
                let room_name = room.attribute("name").unwrap_or_default();
                for node in room.children().filter(|n| n.has_tag_name("event")) {
                    let Some(event) = parse_event(node, room_name) else {
                        continue;
                    };
                    // later duplicates replace earlier ones
                    events.insert(event.id, event);
                }
            }
        }

        Ok(Self {
            conference,
            events,
            fetched_at: Some(fetched_at),
            fetched_wall: Some(Local::now()),
        })
    }

    pub fn from_events(events: impl IntoIterator<Item = Event>) -> Self {
        Self {
            events: events.into_iter().map(|event| (event.id, event)).collect(),
            fetched_at: Some(Instant::now()),
            fetched_wall: Some(Local::now()),
            ..Self::default()
        }
    }

    pub fn get(&self, id: u64) -> Option<&Event> {
        self.events.get(&id)
    }

    pub fn events(&self) -> &HashMap<u64, Event> {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn conference(&self) -> Option<&str> {
        self.conference.as_deref()
    }

    pub fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }

    pub fn fetched_wall(&self) -> Option<DateTime<Local>> {
        self.fetched_wall
    }
}

fn parse_event(node: roxmltree::Node<'_, '_>, room_name: &str) -> Option<Event> {
    let raw_id = node.attribute("id");
    let Some(id) = raw_id.and_then(|raw| raw.trim().parse::<u64>().ok()) else {
        tracing::warn!(id = ?raw_id, "schedule event without usable id, ignoring");
        return None;
    };
    let persons = node
        .children()
        .filter(|n| n.has_tag_name("persons"))
        .flat_map(|persons| persons.children().filter(|n| n.has_tag_name("person")))
        .map(|person| Person {
            id: person.attribute("id").map(str::to_string),
            name: person.text().unwrap_or_default().to_string(),
        })
        .collect();
    let room = child_text(node, "room").unwrap_or_else(|| room_name.to_string());
    Some(Event {
        id,
        title: child_text(node, "title").unwrap_or_default(),
        subtitle: child_text(node, "subtitle").unwrap_or_default(),
        abstract_text: child_text(node, "abstract").unwrap_or_default(),
        description: child_text(node, "description").unwrap_or_default(),
        track: child_text(node, "track").unwrap_or_default(),
        room,
        persons,
    })
}

fn child_text(node: roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .map(|n| n.text().unwrap_or_default().to_string())
}

/// Where the schedule document comes from.
pub trait ScheduleSource {
    fn fetch(&self) -> Result<String>;
}

pub struct HttpScheduleSource {
    client: Client,
    url: String,
}

impl HttpScheduleSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build schedule http client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl ScheduleSource for HttpScheduleSource {
    fn fetch(&self) -> Result<String> {
        tracing::info!(url = %self.url, "downloading schedule");
        let resp = self
            .client
            .get(&self.url)
            .send()
            .with_context(|| format!("download schedule {}", self.url))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("schedule download {} failed with status {status}", self.url);
        }
        resp.text()
            .with_context(|| format!("read schedule body {}", self.url))
    }
}

/// Holds the most recent successfully parsed schedule.
pub struct ScheduleStore<S> {
    source: S,
    snapshot: Arc<ScheduleSnapshot>,
}

impl<S: ScheduleSource> ScheduleStore<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            snapshot: Arc::new(ScheduleSnapshot::empty()),
        }
    }

    /// Downloads and parses the schedule. On failure the held snapshot is kept.
    pub fn refresh(&mut self) -> Result<Arc<ScheduleSnapshot>> {
        let body = self.source.fetch()?;
        let snapshot = ScheduleSnapshot::parse(&body, Instant::now())?;
        tracing::info!(
            events = snapshot.len(),
            conference = snapshot.conference().unwrap_or("-"),
            fetched_at = %snapshot
                .fetched_wall()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            "schedule loaded"
        );
        self.snapshot = Arc::new(snapshot);
        Ok(Arc::clone(&self.snapshot))
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.is_stale_at(Instant::now(), max_age)
    }

    pub fn is_stale_at(&self, now: Instant, max_age: Duration) -> bool {
        match self.snapshot.fetched_at() {
            Some(fetched) => now.saturating_duration_since(fetched) > max_age,
            None => true,
        }
    }

    pub fn current(&self) -> Arc<ScheduleSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    const SCHEDULE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<schedule>
  <conference>
    <title>DemoCon</title>
    <city>Berlin</city>
  </conference>
  <day index="1" date="2026-10-17">
    <room name="Saal 1">
      <event id="101">
        <room>Saal 1</room>
        <title>Keynote</title>
        <subtitle>Opening</subtitle>
        <track>Main</track>
        <abstract>A talk</abstract>
        <description></description>
        <persons>
          <person id="7">Ada Lovelace</person>
          <person id="8">Grace Hopper</person>
        </persons>
      </event>
      <event id="102">
        <title>No persons here</title>
      </event>
    </room>
  </day>
  <day index="2" date="2026-10-18">
    <room name="Saal 2">
      <event id="42"><title>First</title></event>
      <event id="42"><title>Second</title></event>
      <event id="nope"><title>Broken</title></event>
    </room>
  </day>
</schedule>"#;

    struct Scripted(RefCell<VecDeque<Result<String>>>);

    impl Scripted {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self(RefCell::new(responses.into()))
        }
    }

    impl ScheduleSource for Scripted {
        fn fetch(&self) -> Result<String> {
            self.0
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no more responses")))
        }
    }

    #[test]
    fn parses_events_across_days_and_rooms() -> Result<()> {
        let snapshot = ScheduleSnapshot::parse(SCHEDULE, Instant::now())?;
        assert_eq!(snapshot.conference(), Some("DemoCon"));
        assert_eq!(snapshot.len(), 3);
        let keynote = snapshot.get(101).expect("event 101");
        assert_eq!(keynote.title, "Keynote");
        assert_eq!(keynote.subtitle, "Opening");
        assert_eq!(keynote.track, "Main");
        assert_eq!(keynote.room, "Saal 1");
        assert_eq!(keynote.speaker_names(), "Ada Lovelace, Grace Hopper");
        assert_eq!(keynote.persons[0].id.as_deref(), Some("7"));
        assert_eq!(keynote.summary(), "A talk");
        Ok(())
    }

    #[test]
    fn missing_fields_default_to_empty() -> Result<()> {
        let snapshot = ScheduleSnapshot::parse(SCHEDULE, Instant::now())?;
        let bare = snapshot.get(102).expect("event 102");
        assert_eq!(bare.subtitle, "");
        assert_eq!(bare.description, "");
        assert_eq!(bare.speaker_names(), "");
        assert_eq!(bare.room, "Saal 1");
        Ok(())
    }

    #[test]
    fn duplicate_ids_last_occurrence_wins() -> Result<()> {
        let snapshot = ScheduleSnapshot::parse(SCHEDULE, Instant::now())?;
        assert_eq!(snapshot.get(42).map(|e| e.title.as_str()), Some("Second"));
        Ok(())
    }

    #[test]
    fn parsing_is_deterministic() -> Result<()> {
        let now = Instant::now();
        let a = ScheduleSnapshot::parse(SCHEDULE, now)?;
        let b = ScheduleSnapshot::parse(SCHEDULE, now)?;
        assert_eq!(a.events(), b.events());
        Ok(())
    }

    #[test]
    fn every_key_matches_its_event_id() -> Result<()> {
        let snapshot = ScheduleSnapshot::parse(SCHEDULE, Instant::now())?;
        assert!(snapshot.events().iter().all(|(id, event)| *id == event.id));
        Ok(())
    }

    #[test]
    fn summary_prefers_description() {
        let event = Event {
            abstract_text: "short".to_string(),
            description: "long".to_string(),
            ..Event::default()
        };
        assert_eq!(event.summary(), "long");
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(ScheduleSnapshot::parse("<schedule><day>", Instant::now()).is_err());
    }

    #[test]
    fn empty_store_is_stale() {
        let store = ScheduleStore::new(Scripted::new(vec![]));
        assert!(store.is_stale(Duration::from_secs(600)));
        assert!(store.current().is_empty());
    }

    #[test]
    fn refresh_resets_staleness() -> Result<()> {
        let max_age = Duration::from_secs(600);
        let mut store = ScheduleStore::new(Scripted::new(vec![Ok(SCHEDULE.to_string())]));
        store.refresh()?;
        assert!(!store.is_stale(max_age));
        let fetched = store.current().fetched_at().expect("fetched");
        assert!(!store.is_stale_at(fetched + max_age, max_age));
        assert!(store.is_stale_at(fetched + max_age + Duration::from_secs(1), max_age));
        Ok(())
    }

    #[test]
    fn failed_refresh_keeps_snapshot_and_timer() -> Result<()> {
        let max_age = Duration::from_secs(600);
        let mut store = ScheduleStore::new(Scripted::new(vec![
            Ok(SCHEDULE.to_string()),
            Err(anyhow::anyhow!("connection refused")),
            Ok("<schedule><broken".to_string()),
        ]));
        store.refresh()?;
        let before = store.current();
        let fetched = before.fetched_at().expect("fetched");

        assert!(store.refresh().is_err());
        assert!(store.refresh().is_err());

        let after = store.current();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.fetched_at(), Some(fetched));
        assert!(store.is_stale_at(fetched + max_age + Duration::from_secs(1), max_age));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn http_source_fetches_and_rejects_errors() -> Result<()> {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/schedule.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SCHEDULE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing.xml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let ok_url = format!("{}/schedule.xml", server.uri());
        let missing_url = format!("{}/missing.xml", server.uri());
        let (ok, missing) = tokio::task::spawn_blocking(move || -> Result<_> {
            let timeout = Duration::from_secs(5);
            let ok = HttpScheduleSource::new(ok_url, timeout)?.fetch();
            let missing = HttpScheduleSource::new(missing_url, timeout)?.fetch();
            Ok((ok, missing))
        })
        .await??;

        assert!(ok?.contains("Keynote"));
        assert!(missing.is_err());
        Ok(())
    }
}
