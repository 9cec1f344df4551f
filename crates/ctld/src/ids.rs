use crate::define_id_type;

define_id_type!(JobId, u32);
define_id_type!(Uid, u32);
define_id_type!(Gid, u32);

impl Uid {
    pub const ROOT: Uid = Uid::new(0);

    #[inline]
    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }
}
