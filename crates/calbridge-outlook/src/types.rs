//! Microsoft Graph wire types and their conversion schema.
//!
//! Unlike Google's flat shape, Graph nests the description and location in
//! composite objects; those composites contribute their tagged sub-fields
//! into the same flat map through nested schema slots.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use calbridge_convert::{
    convert, deconvert_into, value, Binding, Composite, ConvertError, FieldSchema, FieldValue,
    Moment, Slot, TimeCodec,
};

/// A Microsoft Graph calendar event.
///
/// `id`, `change_key`, and `web_link` are provider-private and carry no
/// cross-provider tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutlookEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<ItemBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<GraphDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<GraphDateTime>,
    pub is_all_day: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<GraphAttendee>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_link: Option<String>,
}

/// Graph's body composite. Only the content is shared across providers;
/// the content type is a Graph detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemBody {
    pub content_type: String,
    pub content: String,
}

impl Default for ItemBody {
    fn default() -> Self {
        Self {
            content_type: "text".to_string(),
            content: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Location {
    pub display_name: String,
}

/// Graph's naive-local-time-plus-zone shape.
///
/// The client always asks Graph for UTC (`Prefer: outlook.timezone`), and
/// everything this bridge writes is UTC, so the codec refuses any other
/// zone instead of guessing at offsets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GraphDateTime {
    pub date_time: String,
    pub time_zone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GraphAttendee {
    pub email_address: EmailAddress,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub attendee_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailAddress {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl GraphDateTime {
    fn parse_utc(&self, tag: &str) -> Result<DateTime<Utc>, ConvertError> {
        if !matches!(self.time_zone.as_str(), "UTC" | "") {
            return Err(ConvertError::invalid_time(
                tag,
                format!("unsupported time zone '{}'", self.time_zone),
            ));
        }
        NaiveDateTime::parse_from_str(&self.date_time, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| ConvertError::invalid_time(tag, e.to_string()))
    }

    fn from_moment(moment: Moment) -> Self {
        let naive = match moment {
            Moment::At(at) => at.naive_utc(),
            Moment::AllDay(day) => day.and_hms_opt(0, 0, 0).unwrap_or_default(),
        };
        GraphDateTime {
            date_time: naive.format("%Y-%m-%dT%H:%M:%S").to_string(),
            time_zone: "UTC".to_string(),
        }
    }
}

impl TimeCodec for GraphDateTime {
    fn to_moment(&self, tag: &str) -> Result<Moment, ConvertError> {
        Ok(Moment::At(self.parse_utc(tag)?))
    }

    fn from_field(tag: &str, value: Option<&FieldValue>) -> Result<Self, ConvertError> {
        Ok(GraphDateTime::from_moment(Moment::required(tag, value)?))
    }
}

impl FieldSchema for ItemBody {
    const SCHEMA: &'static [Slot<Self>] = &[Slot::Field(Binding {
        tag: "notes",
        get: |b| Ok((!b.content.is_empty()).then(|| FieldValue::Text(b.content.clone()))),
        set: |b, v| {
            if let Some(v) = v {
                b.content = value::text("notes", v)?;
            }
            Ok(())
        },
    })];
}

impl FieldSchema for Location {
    const SCHEMA: &'static [Slot<Self>] = &[Slot::Field(Binding {
        tag: "location",
        get: |l| {
            Ok((!l.display_name.is_empty()).then(|| FieldValue::Text(l.display_name.clone())))
        },
        set: |l, v| {
            if let Some(v) = v {
                l.display_name = value::text("location", v)?;
            }
            Ok(())
        },
    })];
}

impl FieldSchema for OutlookEvent {
    const SCHEMA: &'static [Slot<Self>] = &[
        Slot::Field(Binding {
            tag: "title",
            get: |e| Ok(e.subject.clone().map(FieldValue::Text)),
            set: |e, v| {
                if let Some(v) = v {
                    e.subject = Some(value::text("title", v)?);
                }
                Ok(())
            },
        }),
        Slot::Nested(Composite {
            deconvert: |e, out| match &e.body {
                Some(body) => deconvert_into(body, out),
                None => Ok(()),
            },
            convert: |e, map| convert(e.body.get_or_insert_with(ItemBody::default), map),
        }),
        Slot::Nested(Composite {
            deconvert: |e, out| match &e.location {
                Some(location) => deconvert_into(location, out),
                None => Ok(()),
            },
            convert: |e, map| convert(e.location.get_or_insert_with(Location::default), map),
        }),
        Slot::Field(Binding {
            tag: "start",
            get: |e| {
                e.start
                    .as_ref()
                    .map(|t| {
                        let at = t.parse_utc("start")?;
                        Ok(FieldValue::Moment(if e.is_all_day {
                            Moment::AllDay(at.date_naive())
                        } else {
                            Moment::At(at)
                        }))
                    })
                    .transpose()
            },
            set: |e, v| {
                let moment = Moment::required("start", v)?;
                e.is_all_day = moment.is_all_day();
                e.start = Some(GraphDateTime::from_moment(moment));
                Ok(())
            },
        }),
        Slot::Field(Binding {
            tag: "end",
            get: |e| {
                e.end
                    .as_ref()
                    .map(|t| {
                        let at = t.parse_utc("end")?;
                        Ok(FieldValue::Moment(if e.is_all_day {
                            Moment::AllDay(at.date_naive())
                        } else {
                            Moment::At(at)
                        }))
                    })
                    .transpose()
            },
            set: |e, v| {
                let moment = Moment::required("end", v)?;
                e.end = Some(GraphDateTime::from_moment(moment));
                Ok(())
            },
        }),
        Slot::Field(Binding {
            tag: "attendees",
            get: |e| {
                Ok((!e.attendees.is_empty()).then(|| {
                    FieldValue::List(
                        e.attendees.iter().map(|a| a.email_address.address.clone()).collect(),
                    )
                }))
            },
            set: |e, v| {
                if let Some(v) = v {
                    e.attendees = value::list("attendees", v)?
                        .into_iter()
                        .map(|address| GraphAttendee {
                            email_address: EmailAddress { address, name: None },
                            attendee_type: Some("required".to_string()),
                        })
                        .collect();
                }
                Ok(())
            },
        }),
    ];
}
