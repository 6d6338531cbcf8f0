// Bitfield accessor generation, in the same fashion as the xHCI crate:
// https://github.com/rust-osdev/xhci/blob/06d7b7a23683272ba590422c8eb4b502ad5f16cd/src/macros.rs

macro_rules! set_bits {
    ($range:expr, $method:ident, $ty:ty) => {
        paste::paste! {
            #[allow(unused)]
            pub fn [<set_ $method>](&mut self, value: $ty) -> &mut Self {
                use bit_field::BitField;
                use core::convert::TryInto;
                self.0.set_bits($range, value.try_into().unwrap());
                self
            }
        }
    };
}

macro_rules! get_bits {
    ($range:expr, $method:ident, $ty:ty) => {
        paste::paste! {
            #[allow(unused)]
            pub fn [<$method>](&self) -> $ty {
                use bit_field::BitField;
                self.0.get_bits($range) as $ty
            }
        }
    };
}

macro_rules! rw_bits {
    ($range:expr, $method:ident, $ty:ty) => {
        crate::macros::set_bits!($range, $method, $ty);
        crate::macros::get_bits!($range, $method, $ty);
    };
}

macro_rules! set_bit {
    ($bit:literal, $method:ident) => {
        paste::paste! {
            #[allow(unused)]
            pub fn [<set_ $method>](&mut self, value: bool) -> &mut Self {
                use bit_field::BitField;
                self.0.set_bit($bit, value);
                self
            }
        }
    };
}

macro_rules! get_bit {
    ($bit:literal, $method:ident) => {
        paste::paste! {
            #[allow(unused)]
            pub fn [<$method>](&self) -> bool {
                use bit_field::BitField;
                self.0.get_bit($bit)
            }
        }
    };
}

macro_rules! rw_bit {
    ($bit:literal, $method:ident) => {
        crate::macros::set_bit!($bit, $method);
        crate::macros::get_bit!($bit, $method);
    };
}

pub(crate) use get_bit;
pub(crate) use get_bits;
pub(crate) use rw_bit;
pub(crate) use rw_bits;
pub(crate) use set_bit;
pub(crate) use set_bits;
