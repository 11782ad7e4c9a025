use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::codec::MessageType;

/// Request types understood by i3, sway and scroll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum CommandType {
    RunCommand,
    GetWorkspaces,
    Subscribe,
    GetOutputs,
    GetTree,
    GetMarks,
    GetBarConfig,
    GetVersion,
    GetBindingModes,
    GetConfig,
    SendTick,
    // sway
    GetInputs,
    GetSeats,
    // scroll
    GetScroller,
    GetTrails,
}

impl CommandType {
    pub fn tag(self) -> u32 {
        match self {
            CommandType::RunCommand => 0,
            CommandType::GetWorkspaces => 1,
            CommandType::Subscribe => 2,
            CommandType::GetOutputs => 3,
            CommandType::GetTree => 4,
            CommandType::GetMarks => 5,
            CommandType::GetBarConfig => 6,
            CommandType::GetVersion => 7,
            CommandType::GetBindingModes => 8,
            CommandType::GetConfig => 9,
            CommandType::SendTick => 10,
            CommandType::GetInputs => 100,
            CommandType::GetSeats => 101,
            CommandType::GetScroller => 120,
            CommandType::GetTrails => 121,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        CommandType::iter().find(|ty| ty.tag() == tag)
    }
}

impl From<CommandType> for MessageType {
    fn from(ty: CommandType) -> Self {
        MessageType(ty.tag())
    }
}

/// Event categories a client can subscribe to. The `snake_case` name is the string sent in the
/// subscription filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    Workspace,
    Output,
    Mode,
    Window,
    BarconfigUpdate,
    Binding,
    Shutdown,
    Tick,
    // sway
    BarStateUpdate,
    Input,
    // scroll
    Scroller,
    Trails,
}

impl EventType {
    /// Event number without the event bit.
    pub fn number(self) -> u32 {
        match self {
            EventType::Workspace => 0,
            EventType::Output => 1,
            EventType::Mode => 2,
            EventType::Window => 3,
            EventType::BarconfigUpdate => 4,
            EventType::Binding => 5,
            EventType::Shutdown => 6,
            EventType::Tick => 7,
            EventType::BarStateUpdate => 20,
            EventType::Input => 21,
            EventType::Scroller => 30,
            EventType::Trails => 31,
        }
    }

    pub fn message_type(self) -> MessageType {
        MessageType::event(self.number())
    }

    pub fn from_message_type(ty: MessageType) -> Option<Self> {
        if !ty.is_event() {
            return None;
        }
        EventType::iter().find(|ev| ev.message_type() == ty)
    }
}

impl From<EventType> for MessageType {
    fn from(ty: EventType) -> Self {
        ty.message_type()
    }
}

/// JSON filter sent with [`CommandType::Subscribe`], e.g. `["workspace","mode"]`.
pub fn subscription_payload(events: &[EventType]) -> String {
    let names: Vec<&str> = events.iter().map(|ev| ev.as_ref()).collect();
    serde_json::Value::from(names).to_string()
}
