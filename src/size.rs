//! Window size for PTY

/// Columns used when a caller passes zero
pub const DEFAULT_COLS: u16 = 80;

/// Rows used when a caller passes zero
pub const DEFAULT_ROWS: u16 = 24;

/// Window size in characters and pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowSize {
    /// Number of columns (characters)
    pub cols: u16,
    /// Number of rows (characters)
    pub rows: u16,
    /// Width in pixels (optional, can be 0)
    pub pixel_width: u16,
    /// Height in pixels (optional, can be 0)
    pub pixel_height: u16,
}

impl WindowSize {
    /// Create a new window size
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    /// Create a window size with pixel dimensions
    pub fn with_pixels(cols: u16, rows: u16, pixel_width: u16, pixel_height: u16) -> Self {
        Self {
            cols,
            rows,
            pixel_width,
            pixel_height,
        }
    }

    /// Replace a zero column or row count with the default.
    ///
    /// Both construction and resize go through this, so a PTY never carries
    /// a zero dimension.
    pub fn normalized(self) -> Self {
        Self {
            cols: if self.cols == 0 { DEFAULT_COLS } else { self.cols },
            rows: if self.rows == 0 { DEFAULT_ROWS } else { self.rows },
            ..self
        }
    }

    /// Whether both dimensions are at least one
    pub fn is_valid(&self) -> bool {
        self.cols >= 1 && self.rows >= 1
    }

    /// Convert to libc winsize structure
    #[cfg(unix)]
    pub fn to_winsize(&self) -> libc::winsize {
        libc::winsize {
            ws_row: self.rows,
            ws_col: self.cols,
            ws_xpixel: self.pixel_width,
            ws_ypixel: self.pixel_height,
        }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(DEFAULT_COLS, DEFAULT_ROWS)
    }
}

impl From<(u16, u16)> for WindowSize {
    fn from((cols, rows): (u16, u16)) -> Self {
        Self::new(cols, rows)
    }
}

#[cfg(unix)]
impl From<libc::winsize> for WindowSize {
    fn from(ws: libc::winsize) -> Self {
        Self {
            cols: ws.ws_col,
            rows: ws.ws_row,
            pixel_width: ws.ws_xpixel,
            pixel_height: ws.ws_ypixel,
        }
    }
}
