use const_str::convert_ascii_case;

macro_rules! define_reasons {
    ($( $name:ident ),* $(,)?) => {
        $(
            pub const $name: &str = {
                const RAW: &str = stringify!($name);
                const LOWER: &str = convert_ascii_case!(lower, RAW);
                LOWER
            };
        )*
    };
}

define_reasons! {
		UNAUTHENTICATED,
		AUTH_REJECTED,
		TOKEN_MISMATCH,
		CONFLICT,
		BUSY,
		UNKNOWN_MODE,
		DISPLAY,
		UNKNOWN_COMMAND,
		BAD_REQUEST,
}
