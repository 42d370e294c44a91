//! Google Calendar wire types and their conversion schema.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use calbridge_convert::{
    value, Binding, ConvertError, FieldSchema, FieldValue, Moment, Slot, TimeCodec,
};

/// A Google Calendar event.
///
/// Only the tagged fields cross the provider boundary; `id`, `etag`,
/// `html_link`, and `status` are provider-private.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<GoogleEventTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<GoogleEventTime>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<GoogleAttendee>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
}

/// Google's date-or-datetime union for event boundaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleEventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleAttendee {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub organizer: bool,
}

impl TimeCodec for GoogleEventTime {
    fn to_moment(&self, tag: &str) -> Result<Moment, ConvertError> {
        if let Some(at) = self.date_time {
            Ok(Moment::At(at))
        } else if let Some(day) = self.date {
            Ok(Moment::AllDay(day))
        } else {
            Err(ConvertError::invalid_time(tag, "neither date nor dateTime set"))
        }
    }

    fn from_field(tag: &str, value: Option<&FieldValue>) -> Result<Self, ConvertError> {
        match Moment::required(tag, value)? {
            Moment::At(at) => Ok(GoogleEventTime {
                date: None,
                date_time: Some(at),
                time_zone: Some("UTC".to_string()),
            }),
            Moment::AllDay(day) => Ok(GoogleEventTime {
                date: Some(day),
                date_time: None,
                time_zone: None,
            }),
        }
    }
}

impl FieldSchema for GoogleEvent {
    const SCHEMA: &'static [Slot<Self>] = &[
        Slot::Field(Binding {
            tag: "title",
            get: |e| Ok(e.summary.clone().map(FieldValue::Text)),
            set: |e, v| {
                if let Some(v) = v {
                    e.summary = Some(value::text("title", v)?);
                }
                Ok(())
            },
        }),
        Slot::Field(Binding {
            tag: "notes",
            get: |e| Ok(e.description.clone().map(FieldValue::Text)),
            set: |e, v| {
                if let Some(v) = v {
                    e.description = Some(value::text("notes", v)?);
                }
                Ok(())
            },
        }),
        Slot::Field(Binding {
            tag: "location",
            get: |e| Ok(e.location.clone().map(FieldValue::Text)),
            set: |e, v| {
                if let Some(v) = v {
                    e.location = Some(value::text("location", v)?);
                }
                Ok(())
            },
        }),
        Slot::Field(Binding {
            tag: "start",
            get: |e| {
                e.start
                    .as_ref()
                    .map(|t| t.to_moment("start").map(FieldValue::Moment))
                    .transpose()
            },
            set: |e, v| {
                e.start = Some(GoogleEventTime::from_field("start", v)?);
                Ok(())
            },
        }),
        Slot::Field(Binding {
            tag: "end",
            get: |e| {
                e.end
                    .as_ref()
                    .map(|t| t.to_moment("end").map(FieldValue::Moment))
                    .transpose()
            },
            set: |e, v| {
                e.end = Some(GoogleEventTime::from_field("end", v)?);
                Ok(())
            },
        }),
        Slot::Field(Binding {
            tag: "attendees",
            get: |e| {
                Ok((!e.attendees.is_empty()).then(|| {
                    FieldValue::List(e.attendees.iter().map(|a| a.email.clone()).collect())
                }))
            },
            set: |e, v| {
                if let Some(v) = v {
                    e.attendees = value::list("attendees", v)?
                        .into_iter()
                        .map(|email| GoogleAttendee { email, ..Default::default() })
                        .collect();
                }
                Ok(())
            },
        }),
    ];
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use chrono::TimeZone;

    use super::*;
    use calbridge_convert::{convert, deconvert};

    fn timed_event() -> GoogleEvent {
        GoogleEvent {
            id: Some("ev-1".into()),
            summary: Some("Planning".into()),
            description: Some("Quarterly planning".into()),
            location: Some("Room 4".into()),
            start: Some(GoogleEventTime {
                date_time: Some(Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap()),
                ..Default::default()
            }),
            end: Some(GoogleEventTime {
                date_time: Some(Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap()),
                ..Default::default()
            }),
            attendees: vec![GoogleAttendee {
                email: "alice@example.com".into(),
                ..Default::default()
            }],
            etag: Some("\"rev-1\"".into()),
            ..Default::default()
        }
    }

    #[test]
    fn deconvert_exposes_only_tagged_fields() {
        let map = deconvert(&timed_event()).unwrap();

        let tags: Vec<&str> = map.tags().collect();
        assert_eq!(tags, vec!["title", "notes", "location", "start", "end", "attendees"]);
        assert_eq!(map.get("title").and_then(FieldValue::as_text), Some("Planning"));
        assert!(!map.contains("etag"));
        assert!(!map.contains("id"));
    }

    #[test]
    fn convert_builds_an_event_from_fields() {
        let map = deconvert(&timed_event()).unwrap();

        let mut rebuilt = GoogleEvent::default();
        convert(&mut rebuilt, &map).unwrap();

        assert_eq!(rebuilt.summary.as_deref(), Some("Planning"));
        assert_eq!(rebuilt.start.as_ref().unwrap().time_zone.as_deref(), Some("UTC"));
        assert_eq!(rebuilt.attendees.len(), 1);
        // Provider-private fields stay at their defaults.
        assert!(rebuilt.id.is_none());
        assert!(rebuilt.etag.is_none());
    }

    #[test]
    fn all_day_events_use_the_date_leg() {
        let event = GoogleEvent {
            summary: Some("Offsite".into()),
            start: Some(GoogleEventTime {
                date: Some(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()),
                ..Default::default()
            }),
            end: Some(GoogleEventTime {
                date: Some(NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let map = deconvert(&event).unwrap();
        assert!(matches!(
            map.get("start"),
            Some(FieldValue::Moment(Moment::AllDay(_)))
        ));

        let mut rebuilt = GoogleEvent::default();
        convert(&mut rebuilt, &map).unwrap();
        assert_eq!(
            rebuilt.start.as_ref().unwrap().date,
            Some(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
        );
        assert!(rebuilt.start.as_ref().unwrap().date_time.is_none());
    }

    #[test]
    fn event_without_times_fails_conversion() {
        let map = deconvert(&GoogleEvent {
            summary: Some("no time".into()),
            ..Default::default()
        })
        .unwrap();

        let mut dest = GoogleEvent::default();
        let err = convert(&mut dest, &map).unwrap_err();
        assert_eq!(err, ConvertError::missing("start"));
    }

    #[test]
    fn wire_serialization_uses_camel_case() {
        let event = timed_event();
        let json = serde_json::to_value(&event).unwrap();

        assert!(json.get("htmlLink").is_none());
        assert_eq!(json["start"]["dateTime"], "2024-03-05T14:00:00Z");
        assert_eq!(json["start"]["timeZone"], serde_json::Value::Null);
    }
}
