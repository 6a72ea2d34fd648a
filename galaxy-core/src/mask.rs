//! The filesystem event bitfield, kept as a plain `u32` newtype rather than
//! pulled in from the `inotify` crate's own `EventMask` so that the wire
//! protocol has a stable, daemon-owned representation independent of the
//! kernel-watcher backend.

use std::fmt;

use inotify::{EventMask as InotifyEventMask, WatchMask};

/// A bitfield over the filesystem change events a [`crate::rule::Rule`] or a
/// raw kernel event can carry.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct EventMask(pub u32);

impl EventMask {
    pub const ACCESS: Self = Self(0x0000_0001);
    pub const MODIFY: Self = Self(0x0000_0002);
    pub const ATTRIB: Self = Self(0x0000_0004);
    pub const CLOSE_WRITE: Self = Self(0x0000_0008);
    pub const CLOSE_NOWRITE: Self = Self(0x0000_0010);
    pub const OPEN: Self = Self(0x0000_0020);
    pub const MOVED_FROM: Self = Self(0x0000_0040);
    pub const MOVED_TO: Self = Self(0x0000_0080);
    pub const CREATE: Self = Self(0x0000_0100);
    pub const DELETE: Self = Self(0x0000_0200);
    pub const DELETE_SELF: Self = Self(0x0000_0400);
    pub const UNMOUNT: Self = Self(0x0000_2000);
    pub const Q_OVERFLOW: Self = Self(0x0000_4000);
    pub const IGNORED: Self = Self(0x0000_8000);
    pub const ISDIR: Self = Self(0x4000_0000);
    pub const ONESHOT: Self = Self(0x8000_0000);

    /// Union of every "installable" event: the eleven kernel-delivered
    /// change events, excluding the out-of-band UNMOUNT/Q_OVERFLOW/IGNORED
    /// notifications and the ISDIR/ONESHOT modifier bits.
    pub const ALL_EVENTS: Self = Self(
        Self::ACCESS.0
            | Self::MODIFY.0
            | Self::ATTRIB.0
            | Self::CLOSE_WRITE.0
            | Self::CLOSE_NOWRITE.0
            | Self::OPEN.0
            | Self::MOVED_FROM.0
            | Self::MOVED_TO.0
            | Self::CREATE.0
            | Self::DELETE.0
            | Self::DELETE_SELF.0,
    );

    /// Either half of a close event. Supplemented from `galaxy.c`'s `IN_CLOSE`.
    pub const CLOSE: Self = Self(Self::CLOSE_WRITE.0 | Self::CLOSE_NOWRITE.0);
    /// Either half of a move event. Supplemented from `galaxy.c`'s `IN_MOVE`.
    pub const MOVE: Self = Self(Self::MOVED_FROM.0 | Self::MOVED_TO.0);

    pub const NONE: Self = Self(0);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Translate to the mask `inotify::Watches::add` expects, keeping only
    /// the bits that name an installable event. `ISDIR`/`ONESHOT`/`IGNORED`
    /// etc. are either implicit in the kernel API or handled by the
    /// reader/dispatcher, not requested at install time.
    pub fn to_watch_mask(self) -> WatchMask {
        let mut wm = WatchMask::empty();
        if self.contains(Self::ACCESS) {
            wm |= WatchMask::ACCESS;
        }
        if self.contains(Self::MODIFY) {
            wm |= WatchMask::MODIFY;
        }
        if self.contains(Self::ATTRIB) {
            wm |= WatchMask::ATTRIB;
        }
        if self.contains(Self::CLOSE_WRITE) {
            wm |= WatchMask::CLOSE_WRITE;
        }
        if self.contains(Self::CLOSE_NOWRITE) {
            wm |= WatchMask::CLOSE_NOWRITE;
        }
        if self.contains(Self::OPEN) {
            wm |= WatchMask::OPEN;
        }
        if self.contains(Self::MOVED_FROM) {
            wm |= WatchMask::MOVED_FROM;
        }
        if self.contains(Self::MOVED_TO) {
            wm |= WatchMask::MOVED_TO;
        }
        if self.contains(Self::CREATE) {
            wm |= WatchMask::CREATE;
        }
        if self.contains(Self::DELETE) {
            wm |= WatchMask::DELETE;
        }
        if self.contains(Self::DELETE_SELF) {
            wm |= WatchMask::DELETE_SELF;
        }
        if self.contains(Self::ONESHOT) {
            wm |= WatchMask::ONESHOT;
        }
        wm
    }

    /// Translate a raw mask read back from the kernel into our bitfield.
    pub fn from_inotify(mask: InotifyEventMask) -> Self {
        let mut bits = 0u32;
        let pairs: &[(InotifyEventMask, Self)] = &[
            (InotifyEventMask::ACCESS, Self::ACCESS),
            (InotifyEventMask::MODIFY, Self::MODIFY),
            (InotifyEventMask::ATTRIB, Self::ATTRIB),
            (InotifyEventMask::CLOSE_WRITE, Self::CLOSE_WRITE),
            (InotifyEventMask::CLOSE_NOWRITE, Self::CLOSE_NOWRITE),
            (InotifyEventMask::OPEN, Self::OPEN),
            (InotifyEventMask::MOVED_FROM, Self::MOVED_FROM),
            (InotifyEventMask::MOVED_TO, Self::MOVED_TO),
            (InotifyEventMask::CREATE, Self::CREATE),
            (InotifyEventMask::DELETE, Self::DELETE),
            (InotifyEventMask::DELETE_SELF, Self::DELETE_SELF),
            (InotifyEventMask::UNMOUNT, Self::UNMOUNT),
            (InotifyEventMask::Q_OVERFLOW, Self::Q_OVERFLOW),
            (InotifyEventMask::IGNORED, Self::IGNORED),
            (InotifyEventMask::ISDIR, Self::ISDIR),
        ];
        for (from, to) in pairs {
            if mask.contains(*from) {
                bits |= to.0;
            }
        }
        Self(bits)
    }
}

impl std::ops::BitOr for EventMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitAnd for EventMask {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl std::ops::Not for EventMask {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl From<u32> for EventMask {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

impl From<EventMask> for u32 {
    fn from(mask: EventMask) -> Self {
        mask.0
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMED: &[(EventMask, &str)] = &[
            (EventMask::ACCESS, "ACCESS"),
            (EventMask::MODIFY, "MODIFY"),
            (EventMask::ATTRIB, "ATTRIB"),
            (EventMask::CLOSE_WRITE, "CLOSE_WRITE"),
            (EventMask::CLOSE_NOWRITE, "CLOSE_NOWRITE"),
            (EventMask::OPEN, "OPEN"),
            (EventMask::MOVED_FROM, "MOVED_FROM"),
            (EventMask::MOVED_TO, "MOVED_TO"),
            (EventMask::CREATE, "CREATE"),
            (EventMask::DELETE, "DELETE"),
            (EventMask::DELETE_SELF, "DELETE_SELF"),
            (EventMask::UNMOUNT, "UNMOUNT"),
            (EventMask::Q_OVERFLOW, "Q_OVERFLOW"),
            (EventMask::IGNORED, "IGNORED"),
            (EventMask::ISDIR, "ISDIR"),
            (EventMask::ONESHOT, "ONESHOT"),
        ];
        let mut wrote = false;
        for (flag, name) in NAMED {
            if self.contains(*flag) {
                if wrote {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                wrote = true;
            }
        }
        if !wrote {
            f.write_str("NONE")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_mask_matches_nothing() {
        assert!(EventMask::NONE.is_empty());
        assert!(!EventMask::NONE.intersects(EventMask::ALL_EVENTS));
    }

    #[test]
    fn all_events_is_union_of_first_eleven() {
        let all = EventMask::ALL_EVENTS;
        assert!(all.contains(EventMask::ACCESS));
        assert!(all.contains(EventMask::DELETE_SELF));
        assert!(!all.contains(EventMask::UNMOUNT));
        assert!(!all.contains(EventMask::ISDIR));
    }

    #[test]
    fn debug_lists_set_flag_names() {
        let mask = EventMask::CREATE | EventMask::ISDIR;
        let rendered = format!("{mask:?}");
        assert_eq!(rendered, "CREATE|ISDIR");
    }
}
